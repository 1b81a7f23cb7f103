//! 按账号的互斥闸门
//!
//! 同一账号同一时刻只允许一个同步周期（以及一个引导过程）在执行，
//! 重入直接返回 `InvalidState`，不排队等待。离开作用域时自动释放。

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::error::{MirrorError, Result};

#[derive(Debug, Clone)]
pub struct AccountGate {
    name: &'static str,
    active: Arc<Mutex<HashSet<String>>>,
}

/// 引导过程的闸门
pub type BootstrapRegistry = AccountGate;

impl AccountGate {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            active: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// 进入闸门，账号已在执行中时返回错误
    pub fn try_enter(&self, login: &str) -> Result<AccountGateGuard> {
        let mut active = self.active.lock();
        if !active.insert(login.to_string()) {
            return Err(MirrorError::InvalidState(format!(
                "{} already in progress for account {}",
                self.name, login
            )));
        }
        debug!("进入 {} 闸门: login={}", self.name, login);
        Ok(AccountGateGuard {
            active: Arc::clone(&self.active),
            login: login.to_string(),
        })
    }

    pub fn is_active(&self, login: &str) -> bool {
        self.active.lock().contains(login)
    }
}

#[derive(Debug)]
pub struct AccountGateGuard {
    active: Arc<Mutex<HashSet<String>>>,
    login: String,
}

impl Drop for AccountGateGuard {
    fn drop(&mut self) {
        self.active.lock().remove(&self.login);
    }
}
