use basalt_bson::{Document, DocumentBuilder};

/// The acknowledgement level a caller requests for a write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DurabilityMode {
    /// Fire and forget: `w: 0`.
    None,
    /// Acknowledged by the addressed server: `w: 1`.
    Ack,
    /// Acknowledged and journaled: `w: 1, j: true`.
    Journal,
    /// Acknowledged by `n` replicas: `w: n`.
    Replicas(i32),
    /// Acknowledged by a majority of the replica set: `w: "majority"`.
    Majority,
    /// Acknowledged and flushed to disk: `w: 1, fsync: true`.
    Fsync,
}

/// A durability descriptor: mode plus an optional wait bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Durability {
    mode: DurabilityMode,
    wtimeout_millis: Option<i32>,
}

impl Durability {
    pub const NONE: Durability = Durability::new(DurabilityMode::None);
    pub const ACK: Durability = Durability::new(DurabilityMode::Ack);
    pub const JOURNAL: Durability = Durability::new(DurabilityMode::Journal);
    pub const MAJORITY: Durability = Durability::new(DurabilityMode::Majority);
    pub const FSYNC: Durability = Durability::new(DurabilityMode::Fsync);

    pub const fn new(mode: DurabilityMode) -> Self {
        Self {
            mode,
            wtimeout_millis: None,
        }
    }

    pub fn replicas(count: i32) -> Self {
        Self::new(DurabilityMode::Replicas(count))
    }

    pub fn with_wtimeout(mut self, millis: i32) -> Self {
        self.wtimeout_millis = Some(millis);
        self
    }

    pub fn mode(&self) -> DurabilityMode {
        self.mode
    }

    /// The `writeConcern` document embedded in batched-write commands.
    pub fn write_concern(&self) -> Document {
        let mut builder = DocumentBuilder::new();
        match self.mode {
            DurabilityMode::None => builder.push("w", 0i32),
            DurabilityMode::Ack => builder.push("w", 1i32),
            DurabilityMode::Journal => {
                builder.push("w", 1i32);
                builder.push("j", true);
            }
            DurabilityMode::Replicas(count) => builder.push("w", count),
            DurabilityMode::Majority => builder.push("w", "majority"),
            DurabilityMode::Fsync => {
                builder.push("w", 1i32);
                builder.push("fsync", true);
            }
        }
        if let Some(millis) = self.wtimeout_millis {
            builder.push("wtimeout", millis);
        }
        builder.build()
    }
}

impl Default for Durability {
    fn default() -> Self {
        Self::ACK
    }
}
