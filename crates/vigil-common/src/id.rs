use snowflake::SnowflakeIdGenerator;
use std::sync::{Mutex, OnceLock};

static GENERATOR: OnceLock<Mutex<SnowflakeIdGenerator>> = OnceLock::new();

/// Seeds the process-wide id generator with this node's identity
/// (each in 0-31). Seeding is idempotent: the first call wins, and a
/// process that never seeds runs as node (1, 1).
pub fn init(machine_id: i32, node_id: i32) {
    let _ = GENERATOR.set(Mutex::new(SnowflakeIdGenerator::new(machine_id, node_id)));
}

/// Time-ordered, collision-free row id as a decimal string. Every
/// primary key in the store comes from here.
pub fn next_id() -> String {
    let generator = GENERATOR.get_or_init(|| Mutex::new(SnowflakeIdGenerator::new(1, 1)));
    generator
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .real_time_generate()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn ids_are_unique_and_time_ordered() {
        init(1, 1);
        let mut seen = HashSet::new();
        let mut previous = 0i64;
        for _ in 0..1000 {
            let id = next_id();
            let numeric: i64 = id.parse().expect("id is a decimal i64");
            assert!(numeric > previous, "ids must be strictly increasing");
            previous = numeric;
            assert!(seen.insert(id));
        }
    }

    #[test]
    fn reseeding_does_not_replace_the_generator() {
        init(2, 3);
        let before = next_id();
        init(4, 5);
        let after = next_id();
        // Same generator either way; only uniqueness matters here.
        assert_ne!(before, after);
    }
}
