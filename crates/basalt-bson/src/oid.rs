use std::fmt;
use std::process;
use std::sync::OnceLock;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use rand::Rng;

/// A 12-byte unique document identifier.
///
/// Layout: 4-byte big-endian seconds since the epoch, 3-byte machine nonce,
/// 2-byte process id, 3-byte big-endian counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectId {
    bytes: [u8; 12],
}

static MACHINE_NONCE: OnceLock<[u8; 3]> = OnceLock::new();
static COUNTER: OnceLock<AtomicU32> = OnceLock::new();

fn machine_nonce() -> [u8; 3] {
    *MACHINE_NONCE.get_or_init(|| {
        let mut rng = rand::thread_rng();
        [rng.r#gen(), rng.r#gen(), rng.r#gen()]
    })
}

fn next_count() -> u32 {
    let counter = COUNTER.get_or_init(|| AtomicU32::new(rand::thread_rng().r#gen()));
    counter.fetch_add(1, Ordering::Relaxed)
}

impl ObjectId {
    /// Generates a fresh id from the current time.
    pub fn new() -> Self {
        let seconds = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as u32)
            .unwrap_or(0);
        let machine = machine_nonce();
        let pid = process::id() as u16;
        let count = next_count();

        let mut bytes = [0u8; 12];
        bytes[0..4].copy_from_slice(&seconds.to_be_bytes());
        bytes[4..7].copy_from_slice(&machine);
        bytes[7..9].copy_from_slice(&pid.to_be_bytes());
        bytes[9..12].copy_from_slice(&count.to_be_bytes()[1..4]);
        Self { bytes }
    }

    pub fn from_bytes(bytes: [u8; 12]) -> Self {
        Self { bytes }
    }

    pub fn bytes(&self) -> &[u8; 12] {
        &self.bytes
    }

    /// Seconds since the epoch embedded in the id.
    pub fn timestamp(&self) -> u32 {
        u32::from_be_bytes([self.bytes[0], self.bytes[1], self.bytes[2], self.bytes[3]])
    }
}

impl Default for ObjectId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in &self.bytes {
            write!(f, "{b:02x}")?;
        }
        Ok(())
    }
}
