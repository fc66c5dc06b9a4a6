//! Correlation identifiers of the form `req_<epoch-ms>_<9 base36 chars>`.

use rand::Rng;

const SUFFIX_LEN: usize = 9;
const BASE36: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Generate a fresh request id stamped with the current wall-clock time.
pub fn next_request_id() -> String {
    format_request_id(chrono::Utc::now().timestamp_millis(), &mut rand::thread_rng())
}

/// Build a request id for `epoch_ms` with a random base36 suffix drawn from
/// `rng`.
pub fn format_request_id<R: Rng + ?Sized>(epoch_ms: i64, rng: &mut R) -> String {
    let suffix: String = (0..SUFFIX_LEN)
        .map(|_| BASE36[rng.gen_range(0..BASE36.len())] as char)
        .collect();
    format!("req_{epoch_ms}_{suffix}")
}
