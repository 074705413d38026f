//! Readable task identifiers (`brave-otter-42`)

use rand::seq::SliceRandom;
use rand::Rng;

const ADJECTIVES: &[&str] = &[
    "amber", "bold", "brave", "calm", "clever", "cosmic", "crisp", "dapper", "eager", "fancy",
    "gentle", "glad", "golden", "happy", "humble", "jolly", "keen", "lively", "lucky", "mellow",
    "misty", "nimble", "proud", "quiet", "rapid", "rustic", "silent", "sunny", "swift", "tidy",
    "vivid", "witty",
];

const NOUNS: &[&str] = &[
    "badger", "beacon", "canyon", "cedar", "comet", "coral", "falcon", "fern", "harbor", "heron",
    "island", "lantern", "maple", "meadow", "otter", "panda", "pebble", "pine", "quartz", "raven",
    "river", "robin", "sparrow", "summit", "thistle", "tiger", "tulip", "valley", "walrus",
    "willow", "yak", "zephyr",
];

/// Generate an id that `taken` rejects as unused.
pub fn readable_id(taken: impl Fn(&str) -> bool) -> String {
    let mut rng = rand::thread_rng();
    loop {
        let id = format!(
            "{}-{}-{}",
            ADJECTIVES.choose(&mut rng).copied().unwrap_or("swift"),
            NOUNS.choose(&mut rng).copied().unwrap_or("otter"),
            rng.gen_range(10..100)
        );
        if !taken(&id) {
            return id;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn ids_have_three_parts() {
        let id = readable_id(|_| false);
        let parts: Vec<_> = id.split('-').collect();
        assert_eq!(parts.len(), 3);
        assert!(ADJECTIVES.contains(&parts[0]));
        assert!(NOUNS.contains(&parts[1]));
        assert!(parts[2].parse::<u32>().is_ok());
    }

    #[test]
    fn regenerates_on_collision() {
        let mut seen = HashSet::new();
        for _ in 0..200 {
            let id = readable_id(|candidate| seen.contains(candidate));
            assert!(seen.insert(id));
        }
    }
}
