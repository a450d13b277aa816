use rand::Rng;

use crate::value::{Record, Value};

/// Perturbs the numeric top-level fields of a record by a bounded
/// fractional jitter.
///
/// Each float `v` becomes `v + v * d` with `d` drawn uniformly from
/// `[-range, range]`; integers use the same formula truncated back to an
/// integer. A field never changes type, and no field is added or removed.
pub fn randomize<R: Rng>(record: &mut Record, range: f64, rng: &mut R) {
    for value in record.values_mut() {
        match value {
            Value::Float(v) => {
                let variation = rng.gen_range(-range..=range);
                *v += *v * variation;
            }
            Value::Integer(v) => {
                let variation = rng.gen_range(-range..=range);
                *v = (*v as f64 + *v as f64 * variation) as i64;
            }
            _ => {}
        }
    }
}
