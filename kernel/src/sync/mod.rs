mod once;
mod sleep_lock;
mod spin_lock;

pub use self::{
    once::Once,
    sleep_lock::SleepLock,
    spin_lock::{RawSpinLock, SpinLock, SpinLockCondVar, SpinLockGuard},
};
