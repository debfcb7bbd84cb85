use std::sync::atomic::{AtomicU64, Ordering};

use crate::handle::Handle;
use crate::options::{LeOptions, ListKind};
use crate::proto::{Header, HdrType};
use crate::{Error, Result};

/// Wildcard user id: any initiator passes the user check.
pub const UID_ANY: u32 = u32::MAX;
/// Wildcard job id: any initiator passes the job check.
pub const JID_ANY: u32 = u32::MAX;

/// Description of a list entry, passed to [`Ni::le_append`].
///
/// [`Ni::le_append`]: crate::Ni::le_append
#[derive(Debug)]
pub struct LeDesc {
    pub start: *mut u8,
    pub length: u64,
    /// Counting event incremented per `options`, or [`Handle::NONE`].
    pub ct: Handle,
    /// Access id compared against the wildcard selected by
    /// [`LeOptions::AUTH_USE_JID`].
    pub ac_id: u32,
    pub options: LeOptions,
}

/// Description of a match entry: a list entry plus matching state.
#[derive(Debug)]
pub struct MeDesc {
    pub start: *mut u8,
    pub length: u64,
    pub ct: Handle,
    pub ac_id: u32,
    pub options: LeOptions,
    pub match_bits: u64,
    pub ignore_bits: u64,
    /// With [`LeOptions::MANAGE_LOCAL`], the entry unlinks once its
    /// remaining room drops below this.
    pub min_free: u64,
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct MatchSpec {
    pub match_bits: u64,
    pub ignore_bits: u64,
    pub min_free: u64,
}

/// A posted target-side buffer, linked on one list of one portal-table
/// entry. Match entries carry a [`MatchSpec`]; plain list entries match
/// positionally.
pub(crate) struct ListEntry {
    pub start: usize,
    pub length: u64,
    pub options: LeOptions,
    pub ac_id: u32,
    pub ct: Option<Handle>,
    pub user_ptr: u64,
    pub matching: Option<MatchSpec>,
    pub pt_index: u32,
    pub list: ListKind,
    /// Locally-managed append offset, used with
    /// [`LeOptions::MANAGE_LOCAL`].
    consumed: AtomicU64,
}

impl ListEntry {
    pub(crate) fn from_le(desc: &LeDesc, pt_index: u32, list: ListKind, user_ptr: u64) -> Result<ListEntry> {
        if desc.start.is_null() && desc.length > 0 {
            return Err(Error::ArgInvalid);
        }
        Ok(ListEntry {
            start: desc.start as usize,
            length: desc.length,
            options: desc.options,
            ac_id: desc.ac_id,
            ct: if desc.ct == Handle::NONE {
                None
            } else {
                Some(desc.ct)
            },
            user_ptr,
            matching: None,
            pt_index,
            list,
            consumed: AtomicU64::new(0),
        })
    }

    pub(crate) fn from_me(desc: &MeDesc, pt_index: u32, list: ListKind, user_ptr: u64) -> Result<ListEntry> {
        if desc.start.is_null() && desc.length > 0 {
            return Err(Error::ArgInvalid);
        }
        Ok(ListEntry {
            start: desc.start as usize,
            length: desc.length,
            options: desc.options,
            ac_id: desc.ac_id,
            ct: if desc.ct == Handle::NONE {
                None
            } else {
                Some(desc.ct)
            },
            user_ptr,
            matching: Some(MatchSpec {
                match_bits: desc.match_bits,
                ignore_bits: desc.ignore_bits,
                min_free: desc.min_free,
            }),
            pt_index,
            list,
            consumed: AtomicU64::new(0),
        })
    }

    /// Match-bits and room test; permission checks come after and fail
    /// loudly rather than falling through to the next entry.
    pub(crate) fn matches(&self, hdr: &Header) -> bool {
        if let Some(spec) = &self.matching {
            if (hdr.match_bits ^ spec.match_bits) & !spec.ignore_bits != 0 {
                return false;
            }
        }
        if self.options.contains(LeOptions::MANAGE_LOCAL) {
            let remaining = self.length.saturating_sub(self.consumed.load(Ordering::SeqCst));
            if u64::from(hdr.length) > remaining {
                return false;
            }
        }
        true
    }

    /// Authentication and operation-kind gate.
    pub(crate) fn permission_ok(&self, ty: HdrType) -> bool {
        let auth_ok = if self.options.contains(LeOptions::AUTH_USE_JID) {
            self.ac_id == JID_ANY
        } else {
            self.ac_id == UID_ANY
        };
        if !auth_ok {
            return false;
        }
        if ty.is_put_class() && !self.options.contains(LeOptions::OP_PUT) {
            return false;
        }
        if ty.is_get_class()
            && !self
                .options
                .intersects(LeOptions::OP_GET | LeOptions::ACK_DISABLE)
        {
            return false;
        }
        true
    }

    /// Claims the landing offset for a delivery of `len` bytes and
    /// reports whether the entry should unlink afterwards.
    pub(crate) fn claim_offset(&self, hdr_offset: u64, len: u64) -> (u64, bool) {
        if self.options.contains(LeOptions::MANAGE_LOCAL) {
            let offset = self.consumed.fetch_add(len, Ordering::SeqCst);
            let min_free = self.matching.map_or(0, |m| m.min_free);
            let exhausted = min_free > 0
                && self.length.saturating_sub(offset + len) < min_free;
            (offset, exhausted)
        } else {
            (hdr_offset, false)
        }
    }

    /// Effective length after clamping the request to the entry window.
    pub(crate) fn mlength(&self, offset: u64, rlength: u64) -> u64 {
        if self.length == 0 {
            0
        } else if rlength + offset > self.length {
            self.length.saturating_sub(offset)
        } else {
            rlength
        }
    }

    pub(crate) fn write(&self, offset: u64, data: &[u8]) {
        debug_assert!(offset + data.len() as u64 <= self.length);
        unsafe {
            let dst = (self.start as *mut u8).add(offset as usize);
            std::ptr::copy_nonoverlapping(data.as_ptr(), dst, data.len());
        }
    }

    pub(crate) fn read(&self, offset: u64, len: u64) -> Vec<u8> {
        debug_assert!(offset + len <= self.length);
        unsafe {
            let src = (self.start as *const u8).add(offset as usize);
            std::slice::from_raw_parts(src, len as usize).to_vec()
        }
    }

    /// Mutable view of the delivery window, for atomic application.
    pub(crate) fn window_mut(&self, offset: u64, len: u64) -> &mut [u8] {
        debug_assert!(offset + len <= self.length);
        unsafe {
            let base = (self.start as *mut u8).add(offset as usize);
            std::slice::from_raw_parts_mut(base, len as usize)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn me(match_bits: u64, ignore_bits: u64, options: LeOptions) -> ListEntry {
        let mut buf = [0u8; 64];
        ListEntry::from_me(
            &MeDesc {
                start: buf.as_mut_ptr(),
                length: 64,
                ct: Handle::NONE,
                ac_id: UID_ANY,
                options,
                match_bits,
                ignore_bits,
                min_free: 0,
            },
            0,
            ListKind::Priority,
            0,
        )
        .unwrap()
    }

    #[test]
    fn match_bits_with_ignore() {
        let entry = me(0x42, 0x0f, LeOptions::OP_PUT);
        let mut hdr = Header::new(HdrType::Put);
        hdr.match_bits = 0x4f;
        assert!(entry.matches(&hdr));
        hdr.match_bits = 0x52;
        assert!(!entry.matches(&hdr));
    }

    #[test]
    fn permission_gates() {
        let entry = me(0, 0, LeOptions::OP_PUT);
        assert!(entry.permission_ok(HdrType::Put));
        assert!(entry.permission_ok(HdrType::Atomic));
        assert!(!entry.permission_ok(HdrType::Get));
        // ACK_DISABLE admits get-class without OP_GET.
        let entry = me(0, 0, LeOptions::OP_PUT | LeOptions::ACK_DISABLE);
        assert!(entry.permission_ok(HdrType::Get));
    }

    #[test]
    fn auth_wildcard_required() {
        let mut buf = [0u8; 8];
        let entry = ListEntry::from_le(
            &LeDesc {
                start: buf.as_mut_ptr(),
                length: 8,
                ct: Handle::NONE,
                ac_id: 7,
                options: LeOptions::OP_PUT,
            },
            0,
            ListKind::Priority,
            0,
        )
        .unwrap();
        assert!(!entry.permission_ok(HdrType::Put));
    }

    #[test]
    fn mlength_clamps() {
        let entry = me(0, 0, LeOptions::OP_PUT);
        assert_eq!(entry.mlength(0, 16), 16);
        assert_eq!(entry.mlength(60, 16), 4);
        assert_eq!(entry.mlength(70, 16), 0);
    }
}
