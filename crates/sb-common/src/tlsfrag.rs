//! TLS ClientHello fragmentation for DPI bypass.
//! TLS ClientHello 分片，用于绕过深度包检测 (DPI)。
//!
//! Passive middleboxes classify TLS connections by pattern-matching the SNI
//! in the first flight. This module finds the server name inside a
//! ClientHello and computes where to cut it so that no single segment or
//! record carries a complete label:
//!
//! - [`index_server_name`] locates the `server_name` host name and its byte
//!   offset inside the record.
//! - [`FragmentPlan::compute`] picks one pseudo-random cut strictly inside
//!   every registrable label (the public suffix travels intact).
//! - [`FragmentPlan::fragments`] and [`FragmentPlan::frame_records`] turn the
//!   plan into wire pieces for segment pacing or record splitting.
//!
//! The I/O side (the connection decorator that applies a plan to the first
//! write) lives in `sb-transport`.
//!
//! # Usage
//!
//! ```ignore
//! use sb_common::tlsfrag::{index_server_name, FragmentPlan, ThreadRandom};
//!
//! if let Some(name) = index_server_name(&client_hello) {
//!     let plan = FragmentPlan::compute(&name, &mut ThreadRandom);
//!     for fragment in plan.fragments(&client_hello) {
//!         stream.write_all(fragment).await?;
//!     }
//! }
//! ```

mod plan;
mod server_name;

pub use plan::{is_valid_dns_name, FragmentPlan, SplitRandom, ThreadRandom, WILDCARD_MARKER};
pub use server_name::{index_server_name, ServerName};

/// TLS record header size (type + version + length).
pub const TLS_RECORD_HEADER_LEN: usize = 5;

/// TLS content type for Handshake.
pub const TLS_CONTENT_TYPE_HANDSHAKE: u8 = 0x16;

/// TLS handshake type for ClientHello.
pub const TLS_HANDSHAKE_TYPE_CLIENT_HELLO: u8 = 0x01;

#[cfg(test)]
pub(crate) mod testdata {
    /// Build a minimal TLS 1.2 ClientHello carrying `sni`, followed by a
    /// supported_versions extension.
    pub(crate) fn client_hello(sni: &str) -> Vec<u8> {
        let name = sni.as_bytes();
        let mut sni_ext = Vec::new();
        sni_ext.extend_from_slice(&((name.len() + 3) as u16).to_be_bytes()); // list length
        sni_ext.push(0x00); // host_name
        sni_ext.extend_from_slice(&(name.len() as u16).to_be_bytes());
        sni_ext.extend_from_slice(name);

        let mut exts = Vec::new();
        exts.extend_from_slice(&[0x00, 0x00]); // server_name
        exts.extend_from_slice(&(sni_ext.len() as u16).to_be_bytes());
        exts.extend_from_slice(&sni_ext);
        exts.extend_from_slice(&[0x00, 0x2b, 0x00, 0x03, 0x02, 0x03, 0x03]); // supported_versions

        let mut body = Vec::new();
        body.extend_from_slice(&[0x03, 0x03]); // client version
        body.extend((0u8..32).collect::<Vec<_>>()); // random
        body.push(0x00); // session id
        body.extend_from_slice(&[0x00, 0x02, 0x00, 0x2f]); // cipher suites
        body.extend_from_slice(&[0x01, 0x00]); // compression methods
        body.extend_from_slice(&(exts.len() as u16).to_be_bytes());
        body.extend_from_slice(&exts);

        let mut handshake = vec![0x01];
        handshake.extend_from_slice(&(body.len() as u32).to_be_bytes()[1..]);
        handshake.extend_from_slice(&body);

        let mut record = vec![0x16, 0x03, 0x01];
        record.extend_from_slice(&(handshake.len() as u16).to_be_bytes());
        record.extend_from_slice(&handshake);
        record
    }
}
