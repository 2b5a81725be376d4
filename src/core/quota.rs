//! 外部调用配额闸门
//!
//! 整个进程生命周期内，经共享中继的成功调用最多 2 次（所有任务共享，不可配置）。
//! 每次调用前先预留一个名额：下游确认成功后 `commit` 计入已消耗，失败或放弃时 RelayPermit 析构自动归还。
//! 预留用 CAS 完成，并发抢最后一个名额时至多一个成功。配额只在内存中，重启即重置。

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use serde::Serialize;

use crate::core::error::QuotaExceeded;

/// 中继调用上限
pub const QUOTA_CAP: u32 = 2;

/// 进程级配额状态；由调用方显式持有并注入，测试中每次新建
#[derive(Debug, Default)]
pub struct QuotaState {
    /// 已消耗 + 在途预留
    reserved: AtomicU32,
    /// 已确认成功的调用数，只增不减
    consumed: AtomicU32,
}

impl QuotaState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn consumed(&self) -> u32 {
        self.consumed.load(Ordering::Acquire)
    }

    pub fn in_flight(&self) -> u32 {
        self.reserved
            .load(Ordering::Acquire)
            .saturating_sub(self.consumed())
    }

    pub fn snapshot(&self) -> QuotaSnapshot {
        QuotaSnapshot {
            consumed: self.consumed(),
            in_flight: self.in_flight(),
            cap: QUOTA_CAP,
        }
    }

    fn try_reserve(&self) -> Result<(), QuotaExceeded> {
        self.reserved
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < QUOTA_CAP).then_some(n + 1)
            })
            .map(|_| ())
            .map_err(|reserved| {
                let used = self.consumed().min(reserved);
                QuotaExceeded {
                    used,
                    pending: reserved - used,
                    cap: QUOTA_CAP,
                }
            })
    }
}

/// 用于状态接口的快照
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct QuotaSnapshot {
    pub consumed: u32,
    pub in_flight: u32,
    pub cap: u32,
}

/// 每次调用尝试选出的凭据来源
#[derive(Debug)]
pub enum CredentialSource {
    /// 经共享中继，持有一个预留名额
    Relay(RelayPermit),
    /// 用户自己的 Key，不计配额
    LocalKey,
    /// 没有任何可用路由，调用方应走本地模板
    None,
}

impl CredentialSource {
    pub fn label(&self) -> &'static str {
        match self {
            CredentialSource::Relay(_) => "relay",
            CredentialSource::LocalKey => "local_key",
            CredentialSource::None => "none",
        }
    }
}

/// 中继名额的预留凭证；`commit` 之前被丢弃即归还名额
#[derive(Debug)]
pub struct RelayPermit {
    state: Arc<QuotaState>,
    committed: bool,
}

impl RelayPermit {
    /// 下游确认成功后调用，名额转为已消耗
    pub fn commit(mut self) -> u32 {
        self.committed = true;
        self.state.consumed.fetch_add(1, Ordering::AcqRel) + 1
    }
}

impl Drop for RelayPermit {
    fn drop(&mut self) {
        if !self.committed {
            self.state.reserved.fetch_sub(1, Ordering::AcqRel);
        }
    }
}

/// 配额闸门：决定每次调用走中继、本地 Key，还是拒绝
#[derive(Debug, Clone)]
pub struct QuotaGate {
    state: Arc<QuotaState>,
    relay_configured: bool,
}

impl QuotaGate {
    pub fn new(state: Arc<QuotaState>, relay_configured: bool) -> Self {
        Self {
            state,
            relay_configured,
        }
    }

    pub fn state(&self) -> &Arc<QuotaState> {
        &self.state
    }

    pub fn relay_configured(&self) -> bool {
        self.relay_configured
    }

    /// 决策顺序：本地 Key 优先且不计数；否则中继有名额则预留；中继名额用完则报 QuotaExceeded；
    /// 未配置中继时返回 `CredentialSource::None`
    pub fn acquire_call(&self, local_key_present: bool) -> Result<CredentialSource, QuotaExceeded> {
        if local_key_present {
            return Ok(CredentialSource::LocalKey);
        }
        if !self.relay_configured {
            return Ok(CredentialSource::None);
        }
        self.state.try_reserve()?;
        Ok(CredentialSource::Relay(RelayPermit {
            state: Arc::clone(&self.state),
            committed: false,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn relay_gate() -> QuotaGate {
        QuotaGate::new(Arc::new(QuotaState::new()), true)
    }

    #[test]
    fn local_key_bypasses_counter() {
        let gate = relay_gate();
        for _ in 0..2 {
            if let CredentialSource::Relay(p) = gate.acquire_call(false).unwrap() {
                p.commit();
            }
        }
        assert!(gate.acquire_call(false).is_err());
        for _ in 0..5 {
            assert!(matches!(
                gate.acquire_call(true),
                Ok(CredentialSource::LocalKey)
            ));
        }
        assert_eq!(gate.state().consumed(), 2);
    }

    #[test]
    fn third_call_is_rejected_with_usage() {
        let gate = relay_gate();
        for expected in 1..=2 {
            match gate.acquire_call(false).unwrap() {
                CredentialSource::Relay(p) => assert_eq!(p.commit(), expected),
                other => panic!("unexpected {:?}", other),
            }
        }
        let err = gate.acquire_call(false).unwrap_err();
        assert_eq!(err.usage(), "2/2");
    }

    #[test]
    fn in_flight_call_is_reported_as_pending() {
        let gate = relay_gate();
        match gate.acquire_call(false).unwrap() {
            CredentialSource::Relay(p) => p.commit(),
            other => panic!("unexpected {:?}", other),
        };
        let _in_flight = gate.acquire_call(false).unwrap();

        let err = gate.acquire_call(false).unwrap_err();
        assert_eq!((err.used, err.pending), (1, 1));
        assert!(err.to_string().starts_with("Demo limit reached (1/2, 1 pending)"));
    }

    #[test]
    fn dropped_permit_returns_quota() {
        let gate = relay_gate();
        {
            let _failed = gate.acquire_call(false).unwrap();
            assert_eq!(gate.state().in_flight(), 1);
        }
        assert_eq!(gate.state().in_flight(), 0);
        assert_eq!(gate.state().consumed(), 0);

        for _ in 0..2 {
            if let CredentialSource::Relay(p) = gate.acquire_call(false).unwrap() {
                p.commit();
            }
        }
        assert!(gate.acquire_call(false).is_err());
    }

    #[test]
    fn no_relay_means_no_route() {
        let gate = QuotaGate::new(Arc::new(QuotaState::new()), false);
        assert!(matches!(
            gate.acquire_call(false),
            Ok(CredentialSource::None)
        ));
        assert_eq!(gate.state().snapshot().in_flight, 0);
    }

    #[test]
    fn concurrent_race_issues_exactly_cap_permits() {
        let gate = relay_gate();
        let barrier = Arc::new(std::sync::Barrier::new(16));
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let gate = gate.clone();
                let barrier = Arc::clone(&barrier);
                std::thread::spawn(move || {
                    barrier.wait();
                    match gate.acquire_call(false) {
                        Ok(CredentialSource::Relay(p)) => {
                            p.commit();
                            true
                        }
                        _ => false,
                    }
                })
            })
            .collect();

        let granted = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count();
        assert_eq!(granted, QUOTA_CAP as usize);
        assert_eq!(gate.state().consumed(), QUOTA_CAP);
    }
}
