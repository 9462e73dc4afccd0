//! Built-in sample catalog: Blender Foundation open movies with HTTP fallbacks.

use super::entry::{CatalogEntry, MediaKind};

const TRACKER_PARAMS: &str = "&tr=wss%3A%2F%2Ftracker.btorrent.xyz\
&tr=wss%3A%2F%2Ftracker.openwebtorrent.com\
&tr=wss%3A%2F%2Ftracker.fastcast.nz\
&tr=udp%3A%2F%2Ftracker.opentrackr.org%3A1337";

/// Sample entries, newest first. Timestamps are spaced one second apart so
/// the display order is stable.
pub fn sample_entries() -> Vec<CatalogEntry> {
    let now = chrono::Utc::now().timestamp_millis();

    vec![
        CatalogEntry::new(
            "sample_sintel",
            "Sintel (Blender Open Movie)",
            format!("magnet:?xt=urn:btih:08ada5a7a6183aae1e09d831df6748d566095a10&dn=Sintel{TRACKER_PARAMS}"),
            "QmQc6vqZAnpUfTy7FW9zqXd9RCqLdCU7GqQN1GE5LqAqBb",
            MediaKind::Video,
        )
        .with_description(
            "A fantasy short film about a girl named Sintel searching for her pet dragon.",
        )
        .with_category("Animation")
        .with_fallback_url("https://download.blender.org/demo/movies/Sintel.2010.720p.mkv")
        .with_thumbnail_url(
            "https://durian.blender.org/wp-content/uploads/2010/06/sintel-dragon-1920.jpg",
        )
        .with_created_at(now)
        .with_added_by("system"),
        CatalogEntry::new(
            "sample_bigbuckbunny",
            "Big Buck Bunny (Blender Open Movie)",
            format!(
                "magnet:?xt=urn:btih:dd8255ecdc7ca55fb0bbf81323d87062db1f6d1c&dn=Big+Buck+Bunny{TRACKER_PARAMS}"
            ),
            "QmYwAPJzv5CZsnA625s3Xf2nemtYgPpHdWEz79ojWnPbdG",
            MediaKind::Video,
        )
        .with_description(
            "A comedy short film about a giant rabbit who takes revenge on three bullies.",
        )
        .with_category("Animation")
        .with_fallback_url(
            "https://download.blender.org/demo/movies/BBB/bbb_sunflower_1080p_30fps_normal.mp4",
        )
        .with_thumbnail_url(
            "https://upload.wikimedia.org/wikipedia/commons/c/c5/Big_buck_bunny_poster_big.jpg",
        )
        .with_created_at(now - 1000)
        .with_added_by("system"),
        CatalogEntry::new(
            "sample_tearsofsteel",
            "Tears of Steel (Blender Open Movie)",
            format!(
                "magnet:?xt=urn:btih:209c8226b299b308beaf2b9cd3fb49212dbd13ec&dn=Tears+Of+Steel{TRACKER_PARAMS}"
            ),
            "QmQcX3rZLVgvuKDe8hRMZn3SJGFXw9LwY3tDsv4hRQqGpH",
            MediaKind::Video,
        )
        .with_description(
            "A sci-fi short film featuring warriors and scientists in a futuristic setting.",
        )
        .with_category("Sci-Fi")
        .with_fallback_url("https://download.blender.org/demo/movies/ToS/tears_of_steel_720p.mov")
        .with_thumbnail_url("https://mango.blender.org/wp-content/uploads/2012/09/01_intro_03.jpg")
        .with_created_at(now - 2000)
        .with_added_by("system"),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::validation::validate_entry;
    use crate::reference::MagnetLink;

    #[test]
    fn test_samples_are_valid() {
        for sample in sample_entries() {
            validate_entry(&sample).unwrap();
            assert!(sample.fallback_url.is_some());
        }
    }

    #[test]
    fn test_sample_magnets_carry_trackers() {
        let samples = sample_entries();
        let magnet = MagnetLink::parse(&samples[0].primary_reference).unwrap();
        assert_eq!(
            magnet.info_hash.to_string(),
            "08ada5a7a6183aae1e09d831df6748d566095a10"
        );
        assert_eq!(magnet.trackers.len(), 4);
    }
}
