//! Common protocol helpers for the outbound dialer stack.
//! 出站拨号栈的通用协议工具库。
//!
//! - TLS ClientHello inspection and fragment planning (`tlsfrag`)

#![warn(missing_docs)]
#![warn(unreachable_pub)]

pub mod tlsfrag;

pub use tlsfrag::{index_server_name, FragmentPlan, ServerName, SplitRandom, ThreadRandom};
