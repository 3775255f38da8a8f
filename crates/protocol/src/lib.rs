//! Wire format of the accounting authority: incoming and outgoing message
//! types, the strict JSON codec, broker routing keys, and shard ownership.
//!
//! Messages are JSON objects with a required `"type"` field. Integer fields
//! are plain JSON numbers, floats always carry a fractional part or
//! exponent, dates are `YYYY-MM-DD`, timestamps are RFC 3339, and byte
//! fields are uppercase hex.

pub mod codec;
pub mod config_data;
pub mod hex_bytes;
pub mod messages;
pub mod routing;

pub use codec::{parse_chore, parse_inbound, CodecError};
pub use config_data::{parse_root_config_data, ConfigDataError, DebtorInfo, RootConfigData};
pub use messages::*;
pub use routing::{calc_bin_routing_key, i64_to_hex_routing_key, shard_key, ShardingRealm};
