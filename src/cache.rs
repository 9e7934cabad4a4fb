//! Deterministic per-node cache keys.
//!
//! A key fingerprints `(node id, params, upstream revisions)`. Params hash
//! order-independently (keys sorted before mixing); upstream revisions hash
//! as an ordered sequence so that swapping inputs invalidates. FNV-1a is
//! plenty here: the contract is equality and diffusion, not cryptographic
//! strength.

use std::collections::HashMap;

struct Fnv1a64(u64);

impl Fnv1a64 {
    const PRIME: u64 = 0x0000_0100_0000_01B3;

    fn new(seed: u64) -> Self {
        Self(seed)
    }

    fn write_u8(&mut self, v: u8) {
        self.write_bytes(&[v]);
    }

    fn write_u64(&mut self, v: u64) {
        self.write_bytes(&v.to_le_bytes());
    }

    fn write_str(&mut self, s: &str) {
        self.write_u64(s.len() as u64);
        self.write_bytes(s.as_bytes());
    }

    fn write_bytes(&mut self, bytes: &[u8]) {
        let mut h = self.0;
        for &b in bytes {
            h ^= u64::from(b);
            h = h.wrapping_mul(Self::PRIME);
        }
        self.0 = h;
    }

    fn finish(self) -> u64 {
        self.0
    }
}

/// Two independently-seeded 64-bit streams, formatted as a 32-hex-digit key.
pub fn cache_key(
    node_id: &str,
    params: &HashMap<String, serde_json::Value>,
    upstream_revisions: &[u64],
) -> String {
    let mut a = Fnv1a64::new(0xcbf2_9ce4_8422_2325);
    let mut b = Fnv1a64::new(0x9ae1_6a3b_2f90_404f);

    for h in [&mut a, &mut b] {
        h.write_str(node_id);

        let mut keys: Vec<&String> = params.keys().collect();
        keys.sort();
        h.write_u64(keys.len() as u64);
        for k in &keys {
            h.write_str(k);
            write_json_value(h, &params[*k]);
        }

        h.write_u64(upstream_revisions.len() as u64);
        for &rev in upstream_revisions {
            h.write_u64(rev);
        }
    }

    format!("{:016x}{:016x}", a.finish(), b.finish())
}

fn write_json_value(h: &mut Fnv1a64, v: &serde_json::Value) {
    match v {
        serde_json::Value::Null => h.write_u8(0),
        serde_json::Value::Bool(x) => {
            h.write_u8(1);
            h.write_u8(u8::from(*x));
        }
        serde_json::Value::Number(n) => {
            h.write_u8(2);
            h.write_str(&n.to_string());
        }
        serde_json::Value::String(s) => {
            h.write_u8(3);
            h.write_str(s);
        }
        serde_json::Value::Array(items) => {
            h.write_u8(4);
            h.write_u64(items.len() as u64);
            for item in items {
                write_json_value(h, item);
            }
        }
        serde_json::Value::Object(map) => {
            h.write_u8(5);
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            h.write_u64(keys.len() as u64);
            for k in keys {
                h.write_str(k);
                write_json_value(h, &map[k]);
            }
        }
    }
}
