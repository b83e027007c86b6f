//! Locating the SNI host name inside a ClientHello (Go parity: common/tlsfragment/index.go).

use super::{TLS_CONTENT_TYPE_HANDSHAKE, TLS_HANDSHAKE_TYPE_CLIENT_HELLO, TLS_RECORD_HEADER_LEN};

const TLS_HANDSHAKE_HEADER_LEN: usize = 4;
const TLS_RANDOM_LEN: usize = 32;
const TLS_SNI_EXTENSION_TYPE: u16 = 0x0000;
const TLS_SNI_NAME_DNS_HOSTNAME_TYPE: u8 = 0x00;
const TLS_VERSION_BITMASK: u16 = 0xFFFC;
const TLS_VERSION_13: u16 = 0x0304;

/// Server name found in a ClientHello.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerName {
    /// Offset of the first byte of the name, relative to the start of the buffer.
    pub index: usize,
    /// The host name as sent on the wire.
    pub name: String,
}

impl ServerName {
    /// Byte range of the name inside the buffer it was indexed from.
    pub fn range(&self) -> std::ops::Range<usize> {
        self.index..self.index + self.name.len()
    }
}

/// Bounds-checked big-endian reader that tracks its absolute position.
struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(buf: &'a [u8], pos: usize) -> Self {
        Self { buf, pos }
    }

    fn take(&mut self, n: usize) -> Option<&'a [u8]> {
        let end = self.pos.checked_add(n)?;
        let out = self.buf.get(self.pos..end)?;
        self.pos = end;
        Some(out)
    }

    fn u8(&mut self) -> Option<u8> {
        self.take(1).map(|b| b[0])
    }

    fn u16(&mut self) -> Option<u16> {
        self.take(2).map(|b| u16::from_be_bytes([b[0], b[1]]))
    }

    fn u24(&mut self) -> Option<usize> {
        self.take(3)
            .map(|b| (b[0] as usize) << 16 | (b[1] as usize) << 8 | b[2] as usize)
    }

    fn skip_vec8(&mut self) -> Option<()> {
        let n = self.u8()? as usize;
        self.take(n).map(drop)
    }

    fn skip_vec16(&mut self) -> Option<()> {
        let n = self.u16()? as usize;
        self.take(n).map(drop)
    }
}

/// Find the SNI host name in a buffer that starts with a TLS handshake record
/// holding a complete ClientHello.
///
/// Returns `None` for anything else: other record types, truncated or
/// inconsistent lengths, a ClientHello without `server_name`, or a name that
/// is not valid UTF-8. `None` means "send the buffer untouched".
pub fn index_server_name(payload: &[u8]) -> Option<ServerName> {
    let mut record = Cursor::new(payload, 0);
    if record.u8()? != TLS_CONTENT_TYPE_HANDSHAKE {
        return None;
    }
    record.take(2)?; // legacy record version
    let record_len = record.u16()? as usize;
    if payload.len() < TLS_RECORD_HEADER_LEN + record_len {
        return None;
    }

    let mut hs = Cursor::new(payload, TLS_RECORD_HEADER_LEN);
    if hs.u8()? != TLS_HANDSHAKE_TYPE_CLIENT_HELLO {
        return None;
    }
    let handshake_len = hs.u24()?;
    if payload.len() - TLS_RECORD_HEADER_LEN - TLS_HANDSHAKE_HEADER_LEN != handshake_len {
        return None;
    }
    let version = hs.u16()?;
    if version & TLS_VERSION_BITMASK != 0x0300 && version != TLS_VERSION_13 {
        return None;
    }
    hs.take(TLS_RANDOM_LEN)?;
    hs.skip_vec8()?; // session id
    hs.skip_vec16()?; // cipher suites
    hs.skip_vec8()?; // compression methods

    let extensions_len = hs.u16()? as usize;
    let extensions_end = hs.pos.checked_add(extensions_len)?;
    if extensions_end > payload.len() {
        return None;
    }
    while hs.pos < extensions_end {
        let ext_type = hs.u16()?;
        let ext_len = hs.u16()? as usize;
        let body_start = hs.pos;
        let body = hs.take(ext_len)?;
        if ext_type != TLS_SNI_EXTENSION_TYPE {
            continue;
        }
        let mut sni = Cursor::new(body, 0);
        sni.u16()?; // server_name_list length
        if sni.u8()? != TLS_SNI_NAME_DNS_HOSTNAME_TYPE {
            return None;
        }
        let name_len = sni.u16()? as usize;
        let name_start = body_start + sni.pos;
        let name = std::str::from_utf8(sni.take(name_len)?).ok()?;
        return Some(ServerName {
            index: name_start,
            name: name.to_string(),
        });
    }
    None
}
