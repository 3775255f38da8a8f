//! Broker routing keys and shard ownership.
//!
//! Incoming traffic is partitioned over shards by the top 24 bits of
//! `MD5(be64(debtor_id) || be64(creditor_id))`. The same 24 bits, rendered
//! as dot-separated binary digits, form the routing key on the
//! `accounts_in` exchange, so a topic binding of the form `0.1.#` selects
//! a predictable half/quarter/eighth of the key space.

use md5::{Digest, Md5};

/// Renders an i64 as eight dot-separated hex octets, big endian.
/// Used on the `to_creditors`, `to_debtors` and `to_coordinators`
/// exchanges.
pub fn i64_to_hex_routing_key(n: i64) -> String {
    let bytes = n.to_be_bytes();
    let mut out = String::with_capacity(23);
    for (i, byte) in bytes.iter().enumerate() {
        if i > 0 {
            out.push('.');
        }
        out.push_str(&format!("{:02x}", byte));
    }
    out
}

/// The top 24 bits of the account's MD5 digest.
pub fn shard_key(debtor_id: i64, creditor_id: i64) -> u32 {
    let mut hasher = Md5::new();
    hasher.update(debtor_id.to_be_bytes());
    hasher.update(creditor_id.to_be_bytes());
    let digest = hasher.finalize();
    ((digest[0] as u32) << 16) | ((digest[1] as u32) << 8) | digest[2] as u32
}

/// Renders the shard key as 24 dot-separated bits, most significant first.
/// Used on the `accounts_in` exchange.
pub fn calc_bin_routing_key(debtor_id: i64, creditor_id: i64) -> String {
    let key = shard_key(debtor_id, creditor_id);
    let mut out = String::with_capacity(47);
    for i in (0..24).rev() {
        if i < 23 {
            out.push('.');
        }
        out.push(if key & (1 << i) != 0 { '1' } else { '0' });
    }
    out
}

/// The slice of the account space this node owns.
///
/// An account belongs to the realm when its shard key, masked, equals the
/// configured prefix. A zero mask owns everything.
#[derive(Debug, Clone, Copy)]
pub struct ShardingRealm {
    mask: u32,
    prefix: u32,
}

impl ShardingRealm {
    pub fn new(mask: u32, prefix: u32) -> Self {
        Self { mask: mask & 0x00ff_ffff, prefix: prefix & 0x00ff_ffff }
    }

    /// A realm owning the whole key space.
    pub fn whole() -> Self {
        Self::new(0, 0)
    }

    pub fn owns(&self, debtor_id: i64, creditor_id: i64) -> bool {
        shard_key(debtor_id, creditor_id) & self.mask == self.prefix & self.mask
    }
}
