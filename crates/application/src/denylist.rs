//! 令牌黑名单
//!
//! 以 (subject, issued-at) 为键，附带 jti 区分同一秒内签发的令牌；
//! 条目保留到令牌自然过期为止，每次写入时顺带清理已过期条目。

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::RwLock;

use domain::Timestamp;

use crate::token::TokenClaims;

type DenyKey = (String, i64, String);

fn key(claims: &TokenClaims) -> DenyKey {
    (claims.sub.clone(), claims.iat, claims.jti.clone())
}

#[derive(Debug, Default)]
pub struct TokenDenylist {
    entries: RwLock<HashMap<DenyKey, Timestamp>>,
}

impl TokenDenylist {
    pub fn new() -> Self {
        Self::default()
    }

    /// 加入黑名单直到令牌过期。
    ///
    /// 检查与写入在同一把写锁内完成：令牌已在黑名单中时返回 `false`，
    /// 所以并发调用中只有一个能拿到 `true`。
    pub fn deny(&self, claims: &TokenClaims, now: Timestamp) -> bool {
        let mut entries = match self.entries.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        entries.retain(|_, expires_at| now < *expires_at);
        match entries.entry(key(claims)) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(claims.expires_at());
                true
            }
        }
    }

    pub fn is_denied(&self, claims: &TokenClaims, now: Timestamp) -> bool {
        let entries = match self.entries.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        entries
            .get(&key(claims))
            .is_some_and(|expires_at| now < *expires_at)
    }

    pub fn len(&self) -> usize {
        match self.entries.read() {
            Ok(guard) => guard.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
