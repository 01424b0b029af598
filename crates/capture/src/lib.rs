//! # Capture
//!
//! 请求完成钩子：服务器在每个请求结束时同步调用，
//! 冻结请求/响应为 `AccessEvent` 并交给 `DispatchHub`。
//!
//! ## 保证
//!
//! - 钩子从不 panic、从不向服务器返回错误
//! - 冻结完成后才返回，服务器可立即回收请求/响应对象
//!
//! ## 使用示例
//!
//! ```ignore
//! let hook = AccessHook::new(CaptureOptions::default(), Arc::new(hub));
//!
//! // 在服务器的请求完成回调中
//! let timing = timing.finish();
//! hook.on_request_complete(&mut request, &response, timing);
//! ```

pub mod hook;
pub mod parts;

pub use hook::{AccessHook, HookOutcome, HookSnapshot};
pub use parts::{HttpRequest, HttpResponse};
