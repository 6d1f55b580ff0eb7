//! Workload generators.

use arbor_common::Value;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

/// Returns `0..count` in a reproducible shuffled order.
pub fn shuffled_ints(count: i64, seed: u64) -> Vec<i64> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut ints: Vec<i64> = (0..count).collect();
    ints.shuffle(&mut rng);
    ints
}

/// Returns a zero-padded text key, so text order matches `i` order.
pub fn text_key(i: u64) -> Value {
    Value::from(format!("key{i:08}"))
}

/// Returns a random defined value of any shape.
pub fn random_value(rng: &mut impl Rng) -> Value {
    match rng.gen_range(0..5) {
        0 => Value::from(rng.gen::<bool>()),
        1 => Value::from(rng.gen::<i64>()),
        2 => {
            let len = rng.gen_range(0..24);
            let text: String = (0..len).map(|_| rng.gen_range(' '..='~')).collect();
            Value::from(text)
        }
        3 => {
            let len = rng.gen_range(0..16);
            Value::from((0..len).map(|_| rng.gen::<u8>()).collect::<Vec<u8>>())
        }
        _ => Value::from(vec![Value::from(rng.gen_range(-9i64..9)), Value::from("item")]),
    }
}

/// Returns `count` random entries with distinct text keys.
pub fn random_entries(count: u64, seed: u64) -> Vec<(Value, Value)> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut keys: Vec<u64> = (0..count).collect();
    keys.shuffle(&mut rng);
    keys.into_iter()
        .map(|i| (text_key(i), random_value(&mut rng)))
        .collect()
}
