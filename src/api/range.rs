//! `Range: bytes=...` request header parsing (single ranges only).

/// A resolved byte span inside an object of known length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteSpan {
    pub offset: u64,
    pub length: u64,
}

impl ByteSpan {
    /// `Content-Range` header value for this span.
    pub fn content_range(&self, total: u64) -> String {
        format!(
            "bytes {}-{}/{total}",
            self.offset,
            self.offset + self.length - 1
        )
    }
}

/// The range lies entirely outside the object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Unsatisfiable;

/// Resolve a `Range` header against an object of `total` bytes.
///
/// `Ok(None)` means serve the whole object: the header is malformed, uses a
/// unit other than bytes, or asks for several ranges. Supports `a-b`, `a-`
/// and the suffix form `-n`; an end past the object is clamped.
pub fn parse_range(value: &str, total: u64) -> Result<Option<ByteSpan>, Unsatisfiable> {
    let Some(spec) = value.trim().strip_prefix("bytes=") else {
        return Ok(None);
    };
    if spec.contains(',') {
        return Ok(None);
    }
    let Some((start, end)) = spec.trim().split_once('-') else {
        return Ok(None);
    };
    let (start, end) = (start.trim(), end.trim());

    if start.is_empty() {
        let Ok(suffix) = end.parse::<u64>() else {
            return Ok(None);
        };
        if suffix == 0 || total == 0 {
            return Err(Unsatisfiable);
        }
        let length = suffix.min(total);
        return Ok(Some(ByteSpan {
            offset: total - length,
            length,
        }));
    }

    let Ok(offset) = start.parse::<u64>() else {
        return Ok(None);
    };
    let last = if end.is_empty() {
        None
    } else {
        match end.parse::<u64>() {
            Ok(last) if last >= offset => Some(last),
            _ => return Ok(None),
        }
    };

    if offset >= total {
        return Err(Unsatisfiable);
    }
    let last = last.map_or(total - 1, |l| l.min(total - 1));
    Ok(Some(ByteSpan {
        offset,
        length: last - offset + 1,
    }))
}
