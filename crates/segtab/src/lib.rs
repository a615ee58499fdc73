//! Software page-table directory manager.
//!
//! Maintains, for a single address space, the hierarchical radix structure
//! that maps a virtual address to the leaf page-table entry array holding
//! its hardware translation. Allocation and release of the directory nodes
//! themselves, recycling of idle leaf pages, and the concurrency discipline
//! for growing the structure under multiple CPUs all live here; the
//! physical page supply, the hardware PTE format, and the address-space
//! object that embeds a [`Directory`] are all supplied by the caller.
#![cfg_attr(not(test), no_std)]

pub mod activation;
pub mod addr;
mod dir;
pub mod error;
pub mod page_source;
mod pool;
mod segtab;
pub mod trace;

pub use self::{
    activation::{Activation, CpuContext},
    addr::VirtAddr,
    dir::{Dir, Directory, ReserveFlags, TeardownFlags, WalkFlags},
    error::SegtabError,
    page_source::PageSource,
};
