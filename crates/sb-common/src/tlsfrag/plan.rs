//! Split point selection for a located server name.

use super::{ServerName, TLS_RECORD_HEADER_LEN};
use rand::Rng;

/// Leading label sequence marking a masked name; skipped, never split.
pub const WILDCARD_MARKER: &str = "...";

const MAX_DNS_NAME_LEN: usize = 253;
const MAX_DNS_LABEL_LEN: usize = 63;

/// Source of split offsets. Injected so tests can pin exact cuts.
pub trait SplitRandom {
    /// Offset in `1..label_len` for a label of `label_len >= 2` bytes.
    fn interior_offset(&mut self, label_len: usize) -> usize;
}

/// Thread-local RNG; the production source.
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadRandom;

impl SplitRandom for ThreadRandom {
    fn interior_offset(&mut self, label_len: usize) -> usize {
        rand::thread_rng().gen_range(1..label_len)
    }
}

/// Loose DNS host name check used before consulting the public suffix list.
pub fn is_valid_dns_name(name: &str) -> bool {
    let name = name.strip_suffix('.').unwrap_or(name);
    if name.is_empty() || name.len() > MAX_DNS_NAME_LEN {
        return false;
    }
    name.split('.').all(|label| {
        !label.is_empty()
            && label.len() <= MAX_DNS_LABEL_LEN
            && !label.starts_with('-')
            && !label.ends_with('-')
            && label
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
    })
}

/// Ordered absolute offsets at which a ClientHello buffer is cut.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FragmentPlan {
    split_points: Vec<usize>,
}

impl FragmentPlan {
    /// Pick one cut strictly inside every label of `server_name` that is not
    /// part of its public suffix.
    ///
    /// 对公共后缀之前的每个标签，在其内部随机选择一个切分点。
    pub fn compute(server_name: &ServerName, rng: &mut dyn SplitRandom) -> Self {
        let mut offset = server_name.index;
        let mut host = server_name.name.as_str();
        if let Some(rest) = host.strip_prefix(WILDCARD_MARKER) {
            offset += WILDCARD_MARKER.len();
            host = rest;
            if let Some(rest) = host.strip_prefix('.') {
                offset += 1;
                host = rest;
            }
        }
        let host = host.trim_end_matches('.');
        if host.is_empty() {
            return Self::default();
        }

        let mut labels: Vec<&str> = host.split('.').collect();
        let suffix_labels = public_suffix_labels(host);
        if suffix_labels >= labels.len() {
            return Self::default();
        }
        labels.truncate(labels.len() - suffix_labels);

        let mut split_points = Vec::with_capacity(labels.len());
        for label in labels {
            let len = label.len();
            if len >= 2 {
                let at = rng.interior_offset(len).clamp(1, len - 1);
                split_points.push(offset + at);
            }
            offset += len + 1;
        }
        Self { split_points }
    }

    /// Plan with explicit cut offsets, sorted and deduplicated.
    pub fn from_split_points(mut split_points: Vec<usize>) -> Self {
        split_points.sort_unstable();
        split_points.dedup();
        Self { split_points }
    }

    /// Absolute cut offsets in ascending order.
    pub fn split_points(&self) -> &[usize] {
        &self.split_points
    }

    /// No cut was found; the buffer goes out unchanged.
    pub fn is_empty(&self) -> bool {
        self.split_points.is_empty()
    }

    /// Pieces the buffer is cut into.
    pub fn fragment_count(&self) -> usize {
        self.split_points.len() + 1
    }

    /// Slice `buf` at the split points. Points past the end are ignored.
    pub fn fragments<'a>(&self, buf: &'a [u8]) -> Vec<&'a [u8]> {
        let mut out = Vec::with_capacity(self.fragment_count());
        let mut start = 0;
        for &point in self.split_points.iter().filter(|&&p| p <= buf.len()) {
            out.push(&buf[start..point]);
            start = point;
        }
        out.push(&buf[start..]);
        out
    }

    /// Re-frame the fragments as consecutive TLS records.
    ///
    /// Every record reuses the type and version of the original header; the
    /// first fragment drops that header before being framed again.
    pub fn frame_records(&self, buf: &[u8]) -> Vec<u8> {
        let Some(prefix) = buf.get(..3) else {
            return buf.to_vec();
        };
        let mut out =
            Vec::with_capacity(buf.len() + self.split_points.len() * TLS_RECORD_HEADER_LEN);
        for (i, fragment) in self.fragments(buf).into_iter().enumerate() {
            let payload = if i == 0 {
                fragment.get(TLS_RECORD_HEADER_LEN..).unwrap_or_default()
            } else {
                fragment
            };
            out.extend_from_slice(prefix);
            out.extend_from_slice(&(payload.len() as u16).to_be_bytes());
            out.extend_from_slice(payload);
        }
        out
    }
}

/// Number of trailing labels that form the public suffix of `host`.
fn public_suffix_labels(host: &str) -> usize {
    if !is_valid_dns_name(host) {
        return 0;
    }
    let lower = host.to_ascii_lowercase();
    match psl::suffix_str(&lower) {
        Some(suffix) if !suffix.is_empty() => suffix.matches('.').count() + 1,
        _ => 0,
    }
}
