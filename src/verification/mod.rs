//! 操作确认能力
//!
//! 点击 → 等待稳定 → 校验，失败则退避并升级点击方式。

pub mod verifier;

pub use verifier::{click, ActionOutcome, ActionVerifier, AttemptOutcome, ConfirmationSurface};
