//! Status-probe commands the client sends to track server health.

use basalt_bson::doc;

use crate::query::Query;
use crate::read_preference::ReadPreference;

/// The `ismaster` probe: role, canonical name, tags, size caps.
pub fn is_master() -> Query {
    Query::command("admin", doc! { "ismaster": 1i32 }, ReadPreference::nearest())
}

/// The replica-set status probe: per-member optimes for lag derivation.
/// May be refused on restricted deployments; callers treat that as
/// lag-unknown, not as an error.
pub fn replica_set_status() -> Query {
    Query::command(
        "admin",
        doc! { "replSetGetStatus": 1i32 },
        ReadPreference::nearest(),
    )
}

/// The `buildinfo` probe: precise server version.
pub fn build_info() -> Query {
    Query::command("admin", doc! { "buildinfo": 1i32 }, ReadPreference::nearest())
}
