//! Wire framing shared by both transports.
//!
//! Every message is a fixed 72-byte header followed by an optional
//! payload of `length` bytes. Replies reuse the header with the type
//! flipped to [`HdrType::Reply`]; acknowledgements carry no payload and
//! use `length` for the manipulated length. All fields are
//! little-endian.

use crate::{Error, Result};

pub(crate) const HDR_LEN: usize = 72;

/// Acknowledgement codes produced by the matching engine.
pub(crate) const ACK_SILENT: u8 = 0;
pub(crate) const ACK_OK: u8 = 1;
pub(crate) const ACK_OVERFLOW: u8 = 2;
pub(crate) const ACK_PERM_VIOLATION: u8 = 3;

/// Message types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub(crate) enum HdrType {
    Put = 0,
    Get = 1,
    Atomic = 2,
    FetchAtomic = 3,
    Swap = 4,
    Reply = 5,
    Ack = 6,
    /// Shared-memory carrier handed back to its originating interface
    /// for release; never seen on the wire.
    Release = 7,
}

impl HdrType {
    pub(crate) fn from_wire(raw: u8) -> Option<HdrType> {
        Some(match raw {
            0 => HdrType::Put,
            1 => HdrType::Get,
            2 => HdrType::Atomic,
            3 => HdrType::FetchAtomic,
            4 => HdrType::Swap,
            5 => HdrType::Reply,
            6 => HdrType::Ack,
            7 => HdrType::Release,
            _ => return None,
        })
    }

    /// Put-class operations move initiator bytes into the target.
    pub(crate) fn is_put_class(self) -> bool {
        matches!(
            self,
            HdrType::Put | HdrType::Atomic | HdrType::FetchAtomic | HdrType::Swap
        )
    }

    /// Get-class operations read target bytes back to the initiator.
    pub(crate) fn is_get_class(self) -> bool {
        matches!(self, HdrType::Get | HdrType::FetchAtomic | HdrType::Swap)
    }

    pub(crate) fn is_request(self) -> bool {
        self.is_put_class() || self == HdrType::Get
    }
}

/// The fixed message header.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Header {
    pub ty: HdrType,
    pub ni: u8,
    pub ack_req: u8,
    /// Atomic operation for atomic-class requests; the acknowledgement
    /// code on [`HdrType::Ack`] frames.
    pub atom_op: u8,
    pub atom_type: u8,
    /// Failure cause on replies and acknowledgements.
    pub fail: u8,
    /// Sender identity: rank on logical interfaces, pid on physical.
    pub src: u32,
    pub pt_index: u32,
    pub length: u32,
    pub match_bits: u64,
    pub dest_offset: u64,
    pub hdr_data: u64,
    pub user_ptr: u64,
    /// Swap operand for conditional and masked swaps.
    pub operand: u64,
    /// Initiator-side operation token, echoed on replies and
    /// acknowledgements to route them back to the pending operation.
    pub token: u64,
}

impl Header {
    pub(crate) fn new(ty: HdrType) -> Header {
        Header {
            ty,
            ni: 0,
            ack_req: 0,
            atom_op: 0,
            atom_type: 0,
            fail: 0,
            src: 0,
            pt_index: 0,
            length: 0,
            match_bits: 0,
            dest_offset: 0,
            hdr_data: 0,
            user_ptr: 0,
            operand: 0,
            token: 0,
        }
    }

    pub(crate) fn encode(&self, buf: &mut [u8]) {
        assert!(buf.len() >= HDR_LEN);
        buf[0] = self.ty as u8;
        buf[1] = self.ni;
        buf[2] = self.ack_req;
        buf[3] = self.atom_op;
        buf[4] = self.atom_type;
        buf[5] = self.fail;
        buf[6] = 0;
        buf[7] = 0;
        buf[8..12].copy_from_slice(&self.src.to_le_bytes());
        buf[12..16].copy_from_slice(&self.pt_index.to_le_bytes());
        buf[16..20].copy_from_slice(&self.length.to_le_bytes());
        buf[20..24].copy_from_slice(&[0; 4]);
        buf[24..32].copy_from_slice(&self.match_bits.to_le_bytes());
        buf[32..40].copy_from_slice(&self.dest_offset.to_le_bytes());
        buf[40..48].copy_from_slice(&self.hdr_data.to_le_bytes());
        buf[48..56].copy_from_slice(&self.user_ptr.to_le_bytes());
        buf[56..64].copy_from_slice(&self.operand.to_le_bytes());
        buf[64..72].copy_from_slice(&self.token.to_le_bytes());
    }

    pub(crate) fn decode(buf: &[u8]) -> Result<Header> {
        if buf.len() < HDR_LEN {
            return Err(Error::ArgInvalid);
        }
        let ty = HdrType::from_wire(buf[0]).ok_or(Error::ArgInvalid)?;
        Ok(Header {
            ty,
            ni: buf[1],
            ack_req: buf[2],
            atom_op: buf[3],
            atom_type: buf[4],
            fail: buf[5],
            src: u32::from_le_bytes(buf[8..12].try_into().unwrap()),
            pt_index: u32::from_le_bytes(buf[12..16].try_into().unwrap()),
            length: u32::from_le_bytes(buf[16..20].try_into().unwrap()),
            match_bits: u64::from_le_bytes(buf[24..32].try_into().unwrap()),
            dest_offset: u64::from_le_bytes(buf[32..40].try_into().unwrap()),
            hdr_data: u64::from_le_bytes(buf[40..48].try_into().unwrap()),
            user_ptr: u64::from_le_bytes(buf[48..56].try_into().unwrap()),
            operand: u64::from_le_bytes(buf[56..64].try_into().unwrap()),
            token: u64::from_le_bytes(buf[64..72].try_into().unwrap()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_encodes_fixed_width() {
        let mut hdr = Header::new(HdrType::Swap);
        hdr.src = 3;
        hdr.pt_index = 9;
        hdr.length = 16;
        hdr.match_bits = 0xdead_beef;
        hdr.operand = 0x42;
        hdr.token = 77;
        let mut buf = [0u8; HDR_LEN];
        hdr.encode(&mut buf);
        let back = Header::decode(&buf).unwrap();
        assert_eq!(back.ty, HdrType::Swap);
        assert_eq!(back.src, 3);
        assert_eq!(back.pt_index, 9);
        assert_eq!(back.length, 16);
        assert_eq!(back.match_bits, 0xdead_beef);
        assert_eq!(back.operand, 0x42);
        assert_eq!(back.token, 77);
    }

    #[test]
    fn short_buffer_rejected() {
        assert!(Header::decode(&[0u8; HDR_LEN - 1]).is_err());
    }

    #[test]
    fn unknown_type_rejected() {
        let mut buf = [0u8; HDR_LEN];
        buf[0] = 0xff;
        assert!(Header::decode(&buf).is_err());
    }

    #[test]
    fn op_classes() {
        assert!(HdrType::Put.is_put_class());
        assert!(!HdrType::Put.is_get_class());
        assert!(HdrType::Get.is_get_class());
        assert!(HdrType::Swap.is_put_class());
        assert!(HdrType::Swap.is_get_class());
        assert!(!HdrType::Ack.is_request());
    }
}
