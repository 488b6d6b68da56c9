//! Wire-format primitives for the uncompressed resource records stored in a
//! delta.
//!
//! A delta never stores compressed names: every record appended by
//! [`crate::ixfr::store::IxfrStore`] is encoded as
//! `owner_name ‖ type(2) ‖ class(2) ‖ ttl(4) ‖ rdlen(2) ‖ rdata`, with the
//! owner name written as an uncompressed sequence of length-prefixed labels.
//! That means a delta's bytes can be walked and re-emitted verbatim without
//! touching a compression table.

/// The SOA RRTYPE.
pub const TYPE_SOA: u16 = 6;

/// The IN RRCLASS.
pub const CLASS_IN: u16 = 1;

/// The decoded fields of an SOA's RDATA.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SoaFields {
    pub mname: Vec<u8>,
    pub rname: Vec<u8>,
    pub serial: u32,
    pub refresh: u32,
    pub retry: u32,
    pub expire: u32,
    pub minimum: u32,
}

/// Read a big-endian `u16` at `buf[pos..]`.
///
/// Returns `None` if fewer than two bytes remain.
pub(crate) fn read_u16(buf: &[u8], pos: usize) -> Option<u16> {
    let bytes = buf.get(pos..pos + 2)?;
    Some(u16::from_be_bytes([bytes[0], bytes[1]]))
}

/// Read a big-endian `u32` at `buf[pos..]`.
///
/// Returns `None` if fewer than four bytes remain.
pub(crate) fn read_u32(buf: &[u8], pos: usize) -> Option<u32> {
    let bytes = buf.get(pos..pos + 4)?;
    Some(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

/// The RRTYPE of the uncompressed RR starting at `buf[start..]`, without
/// decoding its RDATA.
///
/// Used by [`crate::ixfr::store::IxfrStore`] to silently drop SOA-typed
/// `del_rr`/`add_rr` calls: the SOA boundary of a delta is only ever set
/// through [`add_oldsoa`](crate::ixfr::store::IxfrStore::add_oldsoa) and
/// [`add_newsoa`](crate::ixfr::store::IxfrStore::add_newsoa).
pub(crate) fn rr_type(buf: &[u8], start: usize) -> Option<u16> {
    let after_name = name_end(buf, start)?;
    read_u16(buf, after_name)
}

/// Find the offset just past an uncompressed domain name starting at `pos`.
///
/// Rejects compression pointers outright: a delta never stores one, so any
/// label length byte with either of its top two bits set is treated as
/// malformed input rather than followed.
pub(crate) fn name_end(buf: &[u8], pos: usize) -> Option<usize> {
    let mut i = pos;
    loop {
        let len = *buf.get(i)?;
        if len & 0xC0 != 0 {
            // A compression pointer; not valid in an uncompressed record.
            return None;
        }
        let len = len as usize;
        i += 1;
        if len == 0 {
            return Some(i);
        }
        i = i.checked_add(len)?;
        if i > buf.len() {
            return None;
        }
    }
}

/// The length, in bytes, of the uncompressed RR starting at `buf[start..]`.
///
/// Returns `0` if the record is truncated or its owner name contains a
/// compression pointer, so callers can treat `0` uniformly as "stop, this
/// buffer is not well-formed" without a separate `Result` type at this
/// layer.
pub fn rr_length(buf: &[u8], start: usize) -> usize {
    let Some(after_name) = name_end(buf, start) else {
        return 0;
    };
    // type(2) + class(2) + ttl(4) + rdlen(2)
    let Some(rdlen) = read_u16(buf, after_name + 8) else {
        return 0;
    };
    let rdata_start = after_name + 10;
    let end = rdata_start + rdlen as usize;
    if end > buf.len() {
        return 0;
    }
    end - start
}

/// Split the RDATA out of an uncompressed SOA RR starting at `buf[start..]`,
/// returning its decoded fields.
///
/// Returns `None` if the record is truncated, is not class IN / type SOA, or
/// its RDATA does not parse as the seven SOA fields.
pub fn parse_soa_rdata(buf: &[u8], start: usize) -> Option<SoaFields> {
    let after_name = name_end(buf, start)?;
    let rrtype = read_u16(buf, after_name)?;
    let rrclass = read_u16(buf, after_name + 2)?;
    if rrtype != TYPE_SOA || rrclass != CLASS_IN {
        return None;
    }
    let rdlen = read_u16(buf, after_name + 8)? as usize;
    let rdata_start = after_name + 10;
    let rdata_end = rdata_start + rdlen;
    let rdata = buf.get(rdata_start..rdata_end)?;

    let mname_end = name_end(rdata, 0)?;
    let mname = rdata[..mname_end].to_vec();
    let rname_end = name_end(rdata, mname_end)?;
    let rname = rdata[mname_end..rname_end].to_vec();

    let serial = read_u32(rdata, rname_end)?;
    let refresh = read_u32(rdata, rname_end + 4)?;
    let retry = read_u32(rdata, rname_end + 8)?;
    let expire = read_u32(rdata, rname_end + 12)?;
    let minimum = read_u32(rdata, rname_end + 16)?;
    if rname_end + 20 != rdata.len() {
        return None;
    }

    Some(SoaFields {
        mname,
        rname,
        serial,
        refresh,
        retry,
        expire,
        minimum,
    })
}

/// Build an uncompressed SOA RR with the given apex owner name and TTL.
///
/// `apex_name` must already be an uncompressed, wire-format name (as stored
/// by a zone's apex record); it is copied verbatim as the RR's owner.
pub fn build_soa(apex_name: &[u8], ttl: u32, fields: &SoaFields) -> Vec<u8> {
    let rdata_len = fields.mname.len() + fields.rname.len() + 20;
    let mut out = Vec::with_capacity(apex_name.len() + 10 + rdata_len);
    out.extend_from_slice(apex_name);
    out.extend_from_slice(&TYPE_SOA.to_be_bytes());
    out.extend_from_slice(&CLASS_IN.to_be_bytes());
    out.extend_from_slice(&ttl.to_be_bytes());
    out.extend_from_slice(&(rdata_len as u16).to_be_bytes());
    out.extend_from_slice(&fields.mname);
    out.extend_from_slice(&fields.rname);
    out.extend_from_slice(&fields.serial.to_be_bytes());
    out.extend_from_slice(&fields.refresh.to_be_bytes());
    out.extend_from_slice(&fields.retry.to_be_bytes());
    out.extend_from_slice(&fields.expire.to_be_bytes());
    out.extend_from_slice(&fields.minimum.to_be_bytes());
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn root_name() -> Vec<u8> {
        vec![0]
    }

    fn example_name() -> Vec<u8> {
        // "example.com." as wire-format labels.
        let mut v = Vec::new();
        for label in ["example", "com"] {
            v.push(label.len() as u8);
            v.extend_from_slice(label.as_bytes());
        }
        v.push(0);
        v
    }

    fn soa_fields() -> SoaFields {
        SoaFields {
            mname: example_name(),
            rname: example_name(),
            serial: 12,
            refresh: 3600,
            retry: 900,
            expire: 604800,
            minimum: 3600,
        }
    }

    #[test]
    fn rr_length_round_trips_soa() {
        let apex = example_name();
        let rr = build_soa(&apex, 3600, &soa_fields());
        assert_eq!(rr_length(&rr, 0), rr.len());
    }

    #[test]
    fn rr_length_zero_on_truncation() {
        let apex = example_name();
        let rr = build_soa(&apex, 3600, &soa_fields());
        assert_eq!(rr_length(&rr[..rr.len() - 1], 0), 0);
    }

    #[test]
    fn rr_length_zero_on_compression_pointer() {
        // 0xC0 0x0C is a compression pointer to offset 12.
        let buf = [0xC0, 0x0C, 0, 6, 0, 1, 0, 0, 0x0E, 0x10, 0, 0];
        assert_eq!(rr_length(&buf, 0), 0);
    }

    #[test]
    fn soa_rdata_round_trips() {
        let apex = example_name();
        let fields = soa_fields();
        let rr = build_soa(&apex, 3600, &fields);
        let parsed = parse_soa_rdata(&rr, 0).expect("should parse");
        assert_eq!(parsed, fields);
    }

    #[test]
    fn soa_rdata_rejects_non_soa() {
        // A (type 1) at the root, with 4 bytes of RDATA.
        let mut buf = root_name();
        buf.extend_from_slice(&1u16.to_be_bytes());
        buf.extend_from_slice(&CLASS_IN.to_be_bytes());
        buf.extend_from_slice(&3600u32.to_be_bytes());
        buf.extend_from_slice(&4u16.to_be_bytes());
        buf.extend_from_slice(&[127, 0, 0, 1]);
        assert!(parse_soa_rdata(&buf, 0).is_none());
    }

    #[test]
    fn rr_length_skips_to_next_record() {
        let apex = example_name();
        let fields = soa_fields();
        let mut buf = build_soa(&apex, 3600, &fields);
        let first_len = buf.len();
        buf.extend(build_soa(&apex, 3600, &fields));
        assert_eq!(rr_length(&buf, 0), first_len);
        assert_eq!(rr_length(&buf, first_len), first_len);
    }
}
