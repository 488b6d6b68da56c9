//! On-disk persistence of a zone's version history.
//!
//! Each delta is stored in its own numbered sibling file next to the zone
//! file itself: slot 1 (the newest delta) is `<zone>.ixfr`, slot 2 is
//! `<zone>.ixfr.2`, and so on, oldest last. The file itself is plain
//! zone-presentation text, the same format a zone file uses, with a small
//! header of `;`-prefixed comments identifying the transfer:
//!
//! ```text
//! ; IXFR data file
//! ; zone example.com.
//! ; from_serial 10
//! ; to_serial 11
//! ; resigned 3 RRsets
//! example.com. 3600 IN SOA ns.example.com. hostmaster.example.com. 11 3600 900 604800 3600
//! example.com. 3600 IN SOA ns.example.com. hostmaster.example.com. 10 3600 900 604800 3600
//! www.example.com. 3600 IN A 192.0.2.1
//! example.com. 3600 IN SOA ns.example.com. hostmaster.example.com. 11 3600 900 604800 3600
//! www.example.com. 3600 IN A 192.0.2.2
//! example.com. 3600 IN SOA ns.example.com. hostmaster.example.com. 11 3600 900 604800 3600
//! ```
//!
//! Written in order: `newsoa`, `oldsoa`, then the `del` run (which already
//! ends in a copy of `newsoa`), then the `add` run (likewise). Every write
//! goes through a temporary file in the same directory followed by a
//! rename, the same atomic-write pattern Cascade already uses for zone
//! files (see `crate::util::write_file` in the `cascaded` binary), so a
//! crash mid-write never leaves a half-written delta on disk. A delta
//! already on disk (tracked by [`IxfrDelta::file_num`]) is renamed into its
//! new slot rather than rewritten, so a full chain repack after admitting
//! one new delta costs one write, not N.

use std::fmt::Write as _;
use std::io::Write;

use camino::{Utf8Path, Utf8PathBuf};

use domain::base::Serial;

use crate::ixfr::chain::ZoneIxfr;
use crate::ixfr::codec::{self, SoaFields};
use crate::ixfr::config::IxfrConfig;
use crate::ixfr::delta::IxfrDelta;
use crate::ixfr::error::{IxfrError, PersistenceParseError};

/// The path of the delta file for `slot` (1-based, 1 = newest) next to
/// `zone_file`.
pub fn slot_path(zone_file: &Utf8Path, slot: u32) -> Utf8PathBuf {
    if slot == 1 {
        zone_file.with_extension("ixfr")
    } else {
        let mut s = zone_file.with_extension("ixfr").into_string();
        s.push('.');
        s.push_str(&slot.to_string());
        Utf8PathBuf::from(s)
    }
}

// --- Zone-presentation text encoding of a single RR -------------------------

/// Render a dotted, uncompressed wire-format name as presentation text
/// (`example.com.`, or `.` for the root).
fn name_to_text(buf: &[u8]) -> String {
    let mut labels = Vec::new();
    let mut i = 0;
    while i < buf.len() {
        let len = buf[i] as usize;
        i += 1;
        if len == 0 {
            break;
        }
        labels.push(String::from_utf8_lossy(&buf[i..i + len]).into_owned());
        i += len;
    }
    if labels.is_empty() {
        ".".to_string()
    } else {
        let mut s = labels.join(".");
        s.push('.');
        s
    }
}

/// Parse a dotted presentation-text name back to uncompressed wire format.
fn text_to_name(text: &str) -> Vec<u8> {
    let mut out = Vec::new();
    if text != "." {
        for label in text.trim_end_matches('.').split('.') {
            out.push(label.len() as u8);
            out.extend_from_slice(label.as_bytes());
        }
    }
    out.push(0);
    out
}

/// Render one uncompressed RR (as stored by [`crate::ixfr::store`]) as a
/// single zone-presentation-format line.
///
/// SOA records are rendered with their fields spelled out, matching a
/// hand-written zone file; any other RRTYPE falls back to the RFC 3597
/// generic "unknown RR" form (`TYPEnnn \# length hex`), since this engine
/// never needs to interpret non-SOA RDATA beyond replaying its bytes.
fn rr_to_text(rr: &[u8]) -> Option<String> {
    let after_name = codec::name_end(rr, 0)?;
    let owner = name_to_text(&rr[..after_name]);
    let rtype = codec::read_u16(rr, after_name)?;
    let rclass = codec::read_u16(rr, after_name + 2)?;
    let ttl = codec::read_u32(rr, after_name + 4)?;
    let rdlen = codec::read_u16(rr, after_name + 8)? as usize;
    let rdata_start = after_name + 10;
    if rclass != codec::CLASS_IN {
        // A delta never stores anything outside class IN.
        return None;
    }

    if rtype == codec::TYPE_SOA {
        let fields = codec::parse_soa_rdata(rr, 0)?;
        return Some(format!(
            "{owner} {ttl} IN SOA {mname} {rname} {serial} {refresh} {retry} {expire} {minimum}",
            mname = name_to_text(&fields.mname),
            rname = name_to_text(&fields.rname),
            serial = fields.serial,
            refresh = fields.refresh,
            retry = fields.retry,
            expire = fields.expire,
            minimum = fields.minimum,
        ));
    }

    let rdata = rr.get(rdata_start..rdata_start + rdlen)?;
    let mut hex = String::with_capacity(rdata.len() * 2);
    for byte in rdata {
        let _ = write!(hex, "{byte:02x}");
    }
    Some(format!("{owner} {ttl} IN TYPE{rtype} \\# {rdlen} {hex}"))
}

/// Parse one zone-presentation-format line back into an uncompressed RR.
fn text_to_rr(line: &str) -> Option<Vec<u8>> {
    let mut tokens = line.split_whitespace();
    let owner = text_to_name(tokens.next()?);
    let ttl: u32 = tokens.next()?.parse().ok()?;
    if tokens.next()? != "IN" {
        return None;
    }
    let rtype_token = tokens.next()?;

    let (rtype, rdata) = if rtype_token == "SOA" {
        let mname = text_to_name(tokens.next()?);
        let rname = text_to_name(tokens.next()?);
        let serial: u32 = tokens.next()?.parse().ok()?;
        let refresh: u32 = tokens.next()?.parse().ok()?;
        let retry: u32 = tokens.next()?.parse().ok()?;
        let expire: u32 = tokens.next()?.parse().ok()?;
        let minimum: u32 = tokens.next()?.parse().ok()?;
        let fields = SoaFields {
            mname,
            rname,
            serial,
            refresh,
            retry,
            expire,
            minimum,
        };
        let rr = codec::build_soa(&owner, ttl, &fields);
        return Some(rr);
    } else if let Some(rest) = rtype_token.strip_prefix("TYPE") {
        let rtype: u16 = rest.parse().ok()?;
        if tokens.next()? != "\\#" {
            return None;
        }
        let rdlen: usize = tokens.next()?.parse().ok()?;
        let hex = tokens.next()?;
        let mut rdata = Vec::with_capacity(rdlen);
        let bytes = hex.as_bytes();
        if bytes.len() != rdlen * 2 {
            return None;
        }
        for chunk in bytes.chunks(2) {
            let byte = u8::from_str_radix(std::str::from_utf8(chunk).ok()?, 16).ok()?;
            rdata.push(byte);
        }
        (rtype, rdata)
    } else {
        return None;
    };

    let mut out = Vec::with_capacity(owner.len() + 10 + rdata.len());
    out.extend_from_slice(&owner);
    out.extend_from_slice(&rtype.to_be_bytes());
    out.extend_from_slice(&codec::CLASS_IN.to_be_bytes());
    out.extend_from_slice(&ttl.to_be_bytes());
    out.extend_from_slice(&(rdata.len() as u16).to_be_bytes());
    out.extend_from_slice(&rdata);
    Some(out)
}

// --- Whole-file encoding -----------------------------------------------------

/// Serialize one delta to its on-disk zone-presentation representation.
fn encode_delta(zone_name: &str, delta: &IxfrDelta) -> Result<String, IxfrError> {
    let mut out = String::new();
    let _ = writeln!(out, "; IXFR data file");
    let _ = writeln!(out, "; zone {zone_name}");
    let _ = writeln!(out, "; from_serial {}", delta.old_serial.into_int());
    let _ = writeln!(out, "; to_serial {}", delta.new_serial.into_int());
    if let Some(log_str) = &delta.log_str {
        let _ = writeln!(out, "; {log_str}");
    }
    for rr in [&delta.newsoa, &delta.oldsoa] {
        let line = rr_to_text(rr).ok_or(IxfrError::RequestMalformed)?;
        let _ = writeln!(out, "{line}");
    }
    for section in [&delta.del, &delta.add] {
        let mut pos = 0;
        while pos < section.len() {
            let len = codec::rr_length(section, pos);
            if len == 0 {
                return Err(IxfrError::RequestMalformed);
            }
            let line = rr_to_text(&section[pos..pos + len]).ok_or(IxfrError::RequestMalformed)?;
            let _ = writeln!(out, "{line}");
            pos += len;
        }
    }
    Ok(out)
}

/// Header fields parsed from an IXFR data file, before its RRs are read.
struct Header {
    from_serial: u32,
    to_serial: u32,
    log_str: Option<String>,
}

/// Split the header's comment lines off the front of `lines`, returning the
/// parsed header and the index of the first non-comment line.
fn parse_header(lines: &[&str]) -> Result<(Header, usize), PersistenceParseError> {
    let mut from_serial = None;
    let mut to_serial = None;
    let mut log_str = None;
    let mut i = 0;
    while let Some(line) = lines.get(i) {
        let Some(comment) = line.strip_prefix(';') else {
            break;
        };
        let comment = comment.trim();
        if let Some(rest) = comment.strip_prefix("from_serial ") {
            from_serial = rest.trim().parse().ok();
        } else if let Some(rest) = comment.strip_prefix("to_serial ") {
            to_serial = rest.trim().parse().ok();
        } else if !comment.starts_with("IXFR data file") && !comment.starts_with("zone ") {
            log_str = Some(comment.to_string());
        }
        i += 1;
    }
    let header = Header {
        from_serial: from_serial.ok_or(PersistenceParseError::Truncated)?,
        to_serial: to_serial.ok_or(PersistenceParseError::Truncated)?,
        log_str,
    };
    Ok((header, i))
}

fn decode_delta(text: &str) -> Result<IxfrDelta, PersistenceParseError> {
    let lines: Vec<&str> = text.lines().filter(|l| !l.is_empty()).collect();
    let (header, start) = parse_header(&lines)?;
    let mut rest = lines[start..].iter();

    let mut next_rr = || -> Result<Vec<u8>, PersistenceParseError> {
        let line = rest.next().ok_or(PersistenceParseError::Truncated)?;
        text_to_rr(line).ok_or(PersistenceParseError::Truncated)
    };

    let newsoa = next_rr()?;
    let new_fields = codec::parse_soa_rdata(&newsoa, 0).ok_or(PersistenceParseError::ExpectedSoa)?;
    if new_fields.serial != header.to_serial {
        return Err(PersistenceParseError::SerialMismatch {
            expected: Serial::from(header.to_serial),
            found: Serial::from(new_fields.serial),
        });
    }

    let oldsoa = next_rr()?;
    let old_fields = codec::parse_soa_rdata(&oldsoa, 0).ok_or(PersistenceParseError::ExpectedSoa)?;
    if old_fields.serial != header.from_serial {
        return Err(PersistenceParseError::SerialMismatch {
            expected: Serial::from(header.from_serial),
            found: Serial::from(old_fields.serial),
        });
    }

    let mut del = Vec::new();
    loop {
        let rr = next_rr()?;
        let is_terminal_soa = rr == newsoa;
        del.extend_from_slice(&rr);
        if is_terminal_soa {
            break;
        }
    }

    let mut add = Vec::new();
    loop {
        let rr = next_rr()?;
        let is_terminal_soa = rr == newsoa;
        add.extend_from_slice(&rr);
        if is_terminal_soa {
            break;
        }
    }

    Ok(IxfrDelta {
        old_serial: Serial::from(header.from_serial),
        new_serial: Serial::from(header.to_serial),
        oldsoa,
        newsoa,
        del,
        add,
        log_str: header.log_str,
        file_num: 0,
    })
}

/// Atomically write `text` to `path`, via a temporary file in the same
/// directory followed by a rename.
fn write_atomic(path: &Utf8Path, text: &str) -> Result<(), IxfrError> {
    let dir = path.parent().unwrap_or(Utf8Path::new("."));
    let mut tmp = tempfile::Builder::new()
        .prefix(".ixfr-tmp-")
        .tempfile_in(dir)
        .inspect_err(|e| tracing::error!(error = %e, %path, "failed to create temporary IXFR delta file"))?;
    tmp.write_all(text.as_bytes())?;
    tmp.flush()?;
    tmp.persist(path).map_err(|e| {
        tracing::error!(error = %e.error, %path, "failed to persist IXFR delta file");
        IxfrError::PersistenceIoFailure(e.error)
    })?;
    Ok(())
}

/// Write every delta in `chain` to its numbered slot next to `zone_file`,
/// renaming any delta already on disk (tracked by
/// [`IxfrDelta::file_num`]) into its new slot rather than rewriting it, and
/// removing any stale higher-numbered slot left over from a previous,
/// longer chain.
pub fn write_chain(
    zone_name: &str,
    zone_file: &Utf8Path,
    chain: &mut ZoneIxfr,
    config: &IxfrConfig,
) -> Result<(), IxfrError> {
    let target = chain.len().min(config.ixfr_number) as u32;

    let mut stale = target + 1;
    loop {
        let path = slot_path(zone_file, stale);
        match std::fs::remove_file(path.as_std_path()) {
            Ok(()) => stale += 1,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => break,
            Err(e) => {
                tracing::error!(error = %e, %path, "failed to remove stale IXFR slot");
                return Err(e.into());
            }
        }
    }

    // Oldest -> highest slot number (`target`), newest -> slot 1.
    let serials: Vec<u32> = chain.iter().map(|d| d.old_serial.into_int()).collect();
    let n = serials.len();
    let mut renamed: Vec<Utf8PathBuf> = Vec::new();
    for (i, old_serial) in serials.iter().enumerate() {
        let destnum = (n - i) as u32;
        let Some(delta) = chain.get_mut(Serial::from(*old_serial)) else {
            continue;
        };
        if delta.file_num == destnum {
            continue;
        }
        let dest_path = slot_path(zone_file, destnum);
        if delta.file_num != 0 {
            let src_path = slot_path(zone_file, delta.file_num);
            if dest_path.as_std_path().exists() {
                let _ = std::fs::remove_file(dest_path.as_std_path());
            }
            if let Err(e) = std::fs::rename(src_path.as_std_path(), dest_path.as_std_path()) {
                tracing::error!(error = %e, from = %src_path, to = %dest_path, "failed to repack IXFR delta file");
                for p in &renamed {
                    let _ = std::fs::remove_file(p.as_std_path());
                }
                return Err(e.into());
            }
            renamed.push(dest_path);
            delta.file_num = destnum;
        } else {
            let text = encode_delta(zone_name, delta)?;
            write_atomic(&dest_path, &text)?;
            delta.file_num = destnum;
        }
    }
    Ok(())
}

/// Read back the version history for a zone, validating that it forms an
/// unbroken chain ending at `current_serial`.
///
/// Reads slots starting at 1 (newest) until a slot is missing. A missing
/// slot 1 is not an error: it just means no history has been persisted yet,
/// and an empty chain is returned.
pub fn read_chain(
    zone_file: &Utf8Path,
    current_serial: Serial,
    config: &IxfrConfig,
) -> Result<ZoneIxfr, IxfrError> {
    let mut chain = ZoneIxfr::new();
    let mut expected = current_serial;
    let mut slot = 1;
    let mut deltas = Vec::new();
    loop {
        let path = slot_path(zone_file, slot);
        let text = match std::fs::read_to_string(path.as_std_path()) {
            Ok(t) => t,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => break,
            Err(e) => {
                tracing::error!(error = %e, %path, "failed to read IXFR delta file");
                return Err(e.into());
            }
        };
        let mut delta = decode_delta(&text).map_err(|e| {
            tracing::warn!(error = %e, %path, "failed to parse IXFR delta file");
            IxfrError::PersistenceParseFailure(e)
        })?;
        if delta.new_serial != expected {
            return Err(IxfrError::PersistenceParseFailure(
                PersistenceParseError::SerialMismatch {
                    expected,
                    found: delta.new_serial,
                },
            ));
        }
        delta.file_num = slot;
        expected = delta.old_serial;
        deltas.push(delta);
        slot += 1;
    }
    // `deltas` was collected newest-first; insert oldest-first so eviction
    // order (if the persisted chain exceeds the live config) behaves the
    // same as it would have during normal ingestion.
    for delta in deltas.into_iter().rev() {
        if !chain.add(delta, config) {
            return Err(IxfrError::PersistenceParseFailure(
                PersistenceParseError::BudgetExceeded,
            ));
        }
    }
    Ok(chain)
}

#[cfg(test)]
mod tests {
    use super::*;
    use camino::Utf8PathBuf;

    fn example_name() -> Vec<u8> {
        text_to_name("example.com.")
    }

    fn soa_rr(serial: u32) -> Vec<u8> {
        let apex = example_name();
        codec::build_soa(
            &apex,
            3600,
            &SoaFields {
                mname: apex.clone(),
                rname: apex.clone(),
                serial,
                refresh: 3600,
                retry: 900,
                expire: 604800,
                minimum: 3600,
            },
        )
    }

    fn a_rr(tag: u8) -> Vec<u8> {
        let mut rr = vec![0u8];
        rr.extend_from_slice(&1u16.to_be_bytes());
        rr.extend_from_slice(&codec::CLASS_IN.to_be_bytes());
        rr.extend_from_slice(&3600u32.to_be_bytes());
        rr.extend_from_slice(&4u16.to_be_bytes());
        rr.extend_from_slice(&[tag, tag, tag, tag]);
        rr
    }

    fn delta(old: u32, new: u32) -> IxfrDelta {
        let oldsoa = soa_rr(old);
        let newsoa = soa_rr(new);
        let mut del = a_rr(1);
        del.extend_from_slice(&newsoa);
        let mut add = a_rr(2);
        add.extend_from_slice(&newsoa);
        IxfrDelta {
            old_serial: Serial::from(old),
            new_serial: Serial::from(new),
            oldsoa,
            newsoa,
            del,
            add,
            log_str: Some("test transfer".to_string()),
            file_num: 0,
        }
    }

    #[test]
    fn rr_text_round_trips_soa() {
        let rr = soa_rr(12);
        let text = rr_to_text(&rr).unwrap();
        assert!(text.contains("SOA"));
        let parsed = text_to_rr(&text).unwrap();
        assert_eq!(parsed, rr);
    }

    #[test]
    fn rr_text_round_trips_generic_rdata() {
        let rr = a_rr(7);
        let text = rr_to_text(&rr).unwrap();
        assert!(text.contains("\\#"));
        let parsed = text_to_rr(&text).unwrap();
        assert_eq!(parsed, rr);
    }

    #[test]
    fn delta_round_trips_through_encoding() {
        let d = delta(10, 11);
        let encoded = encode_delta("example.com.", &d).unwrap();
        assert!(encoded.starts_with("; IXFR data file\n"));
        assert!(encoded.contains("; from_serial 10\n"));
        assert!(encoded.contains("; to_serial 11\n"));
        let decoded = decode_delta(&encoded).unwrap();
        assert_eq!(decoded.old_serial, d.old_serial);
        assert_eq!(decoded.new_serial, d.new_serial);
        assert_eq!(decoded.oldsoa, d.oldsoa);
        assert_eq!(decoded.newsoa, d.newsoa);
        assert_eq!(decoded.del, d.del);
        assert_eq!(decoded.add, d.add);
    }

    #[test]
    fn slot_paths_follow_naming_scheme() {
        let zone_file = Utf8PathBuf::from("/var/lib/cascade/example.com.zone");
        assert_eq!(
            slot_path(&zone_file, 1),
            Utf8PathBuf::from("/var/lib/cascade/example.com.ixfr")
        );
        assert_eq!(
            slot_path(&zone_file, 2),
            Utf8PathBuf::from("/var/lib/cascade/example.com.ixfr.2")
        );
    }

    #[test]
    fn write_then_read_round_trips_a_chain() {
        let dir = tempfile::tempdir().unwrap();
        let zone_file =
            Utf8PathBuf::from_path_buf(dir.path().join("example.com.zone")).unwrap();

        let mut chain = ZoneIxfr::new();
        let cfg = IxfrConfig::default();
        chain.add(delta(10, 11), &cfg);
        chain.add(delta(11, 12), &cfg);

        write_chain("example.com.", &zone_file, &mut chain, &cfg).unwrap();
        let loaded = read_chain(&zone_file, Serial::from(12), &cfg).unwrap();

        assert_eq!(loaded.len(), 2);
        assert!(loaded.connected(Serial::from(10), Serial::from(12)));
    }

    #[test]
    fn read_chain_rejects_serial_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let zone_file =
            Utf8PathBuf::from_path_buf(dir.path().join("example.com.zone")).unwrap();

        let mut chain = ZoneIxfr::new();
        let cfg = IxfrConfig::default();
        chain.add(delta(10, 11), &cfg);
        write_chain("example.com.", &zone_file, &mut chain, &cfg).unwrap();

        // Claim the zone's current serial is 99, which does not match the
        // persisted delta's new_serial of 11.
        let result = read_chain(&zone_file, Serial::from(99), &cfg);
        assert!(matches!(
            result,
            Err(IxfrError::PersistenceParseFailure(
                PersistenceParseError::SerialMismatch { .. }
            ))
        ));
    }

    #[test]
    fn write_chain_removes_stale_slots() {
        let dir = tempfile::tempdir().unwrap();
        let zone_file =
            Utf8PathBuf::from_path_buf(dir.path().join("example.com.zone")).unwrap();

        let mut chain = ZoneIxfr::new();
        let cfg = IxfrConfig::default();
        chain.add(delta(10, 11), &cfg);
        chain.add(delta(11, 12), &cfg);
        write_chain("example.com.", &zone_file, &mut chain, &cfg).unwrap();
        assert!(slot_path(&zone_file, 2).as_std_path().exists());

        chain.remove_oldest();
        write_chain("example.com.", &zone_file, &mut chain, &cfg).unwrap();
        assert!(!slot_path(&zone_file, 2).as_std_path().exists());
    }

    #[test]
    fn write_chain_renames_rather_than_rewrites_on_growth() {
        // Per scenario S7: two on-disk deltas, then a third admitted at the
        // front of the chain should shift the existing two by renaming, not
        // by rewriting their content.
        let dir = tempfile::tempdir().unwrap();
        let zone_file =
            Utf8PathBuf::from_path_buf(dir.path().join("example.com.zone")).unwrap();

        let mut chain = ZoneIxfr::new();
        let cfg = IxfrConfig::default();
        chain.add(delta(10, 11), &cfg);
        chain.add(delta(11, 12), &cfg);
        write_chain("example.com.", &zone_file, &mut chain, &cfg).unwrap();
        assert_eq!(chain.find(Serial::from(11)).unwrap().file_num, 1);
        assert_eq!(chain.find(Serial::from(10)).unwrap().file_num, 2);

        chain.add(delta(12, 13), &cfg);
        write_chain("example.com.", &zone_file, &mut chain, &cfg).unwrap();

        assert_eq!(chain.find(Serial::from(12)).unwrap().file_num, 1);
        assert_eq!(chain.find(Serial::from(11)).unwrap().file_num, 2);
        assert_eq!(chain.find(Serial::from(10)).unwrap().file_num, 3);
        assert!(slot_path(&zone_file, 3).as_std_path().exists());
    }

    #[test]
    fn read_chain_with_no_files_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let zone_file =
            Utf8PathBuf::from_path_buf(dir.path().join("example.com.zone")).unwrap();
        let cfg = IxfrConfig::default();
        let chain = read_chain(&zone_file, Serial::from(5), &cfg).unwrap();
        assert!(chain.is_empty());
    }
}
