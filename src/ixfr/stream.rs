//! The IXFR query parser and response streamer.
//!
//! This is the only module that speaks full DNS messages; everything below
//! it (the chain, the store, persistence) deals purely in flat RR bytes. A
//! query arrives as a raw wire-format message, is parsed into an
//! [`IxfrQuery`], matched against a zone's chain, and turned into either a
//! single packed response or an [`IxfrResponseState`] that the caller drains
//! packet by packet.

use domain::base::Serial;

use crate::ixfr::chain::ZoneIxfr;
use crate::ixfr::codec;
use crate::ixfr::error::IxfrError;
use crate::ixfr::interop::{AxfrResponder, ZoneDb};
use crate::ixfr::serial;

/// The DNS header size, in bytes.
const HEADER_LEN: usize = 12;

/// The IXFR QTYPE.
const TYPE_IXFR: u16 = 251;

/// The minimum sensible size for a packed response: a header, a question,
/// and room for at least one RR. Below this, there is no point trying to
/// pack a second record, so `max_packet_size` values under this are clamped
/// up rather than producing a response with zero RRs per packet.
const MIN_PACKET_SIZE: usize = HEADER_LEN + 5 + 20;

/// A parsed IXFR query.
#[derive(Clone, Debug)]
pub struct IxfrQuery {
    /// The query ID, copied into every response packet.
    pub id: u16,

    /// The question section verbatim (QNAME ‖ QTYPE ‖ QCLASS), to be
    /// repeated in every response packet.
    pub question: Vec<u8>,

    /// The zone name taken from the question, in wire format.
    pub qname: Vec<u8>,

    /// The serial the client claims to already have, taken from the SOA in
    /// the query's authority section.
    pub client_serial: Serial,
}

/// Parse an incoming IXFR query per RFC 1995 §3.
///
/// Expects exactly one question of type IXFR, and at least one record in
/// the authority section whose first record is the client's current SOA.
/// Any other shape is [`IxfrError::RequestMalformed`].
pub fn parse_ixfr_query(msg: &[u8]) -> Result<IxfrQuery, IxfrError> {
    if msg.len() < HEADER_LEN {
        return Err(IxfrError::RequestMalformed);
    }
    let id = codec::read_u16(msg, 0).ok_or(IxfrError::RequestMalformed)?;
    let qdcount = codec::read_u16(msg, 4).ok_or(IxfrError::RequestMalformed)?;
    let nscount = codec::read_u16(msg, 8).ok_or(IxfrError::RequestMalformed)?;
    if qdcount != 1 || nscount < 1 {
        return Err(IxfrError::RequestMalformed);
    }

    let qname_end = codec::name_end(msg, HEADER_LEN).ok_or(IxfrError::RequestMalformed)?;
    let qtype = codec::read_u16(msg, qname_end).ok_or(IxfrError::RequestMalformed)?;
    let question_end = qname_end + 4;
    if qtype != TYPE_IXFR {
        return Err(IxfrError::RequestMalformed);
    }
    let qname = msg[HEADER_LEN..qname_end].to_vec();
    let question = msg[HEADER_LEN..question_end].to_vec();

    // Skip any answer-section records (ANCOUNT is expected 0 for a query,
    // but a malformed or probing client's extra records are skipped rather
    // than trusted) to reach the authority section.
    let ancount = codec::read_u16(msg, 6).ok_or(IxfrError::RequestMalformed)?;
    let mut pos = question_end;
    for _ in 0..ancount {
        let len = codec::rr_length(msg, pos);
        if len == 0 {
            return Err(IxfrError::RequestMalformed);
        }
        pos += len;
    }

    let fields = codec::parse_soa_rdata(msg, pos).ok_or(IxfrError::RequestMalformed)?;
    // The authority SOA must be owned by the zone apex.
    if !msg[pos..].starts_with(&qname) {
        return Err(IxfrError::RequestMalformed);
    }

    Ok(IxfrQuery {
        id,
        question,
        qname,
        client_serial: Serial::from(fields.serial),
    })
}

/// The outcome of matching a parsed query against a zone's state.
pub enum QueryOutcome {
    /// The whole response fit in one packet: "zone is up to date" (just the
    /// current SOA), or a full AXFR fallback response that happened to fit.
    Processed(Vec<u8>),

    /// The response must be streamed; drain it with
    /// [`IxfrResponseState::next_packet`].
    InIxfr(Box<IxfrResponseState>),
}

/// Build the single-packet "zone is already current" response: an answer
/// section containing just the zone's current SOA.
fn up_to_date_response(query: &IxfrQuery, soa_rr: &[u8]) -> Vec<u8> {
    pack_packet(query.id, &query.question, &[soa_rr], false)
}

/// Fall back to a full zone transfer, draining `axfr` until it reports the
/// transfer complete and packing every RR it hands back into one response.
///
/// This engine only ever reaches for `axfr` when the chain itself cannot
/// answer (see [`resolve_query`]); RFC 1995 §2 treats that as mandatory, not
/// optional, so a disconnected or missing chain must still produce a usable
/// response rather than an error the caller has to handle specially.
fn axfr_fallback(
    query: &IxfrQuery,
    axfr: &mut dyn AxfrResponder,
    apex: &[u8],
) -> Result<Vec<u8>, IxfrError> {
    let mut rrs: Vec<Vec<u8>> = Vec::new();
    loop {
        rrs.extend(axfr.axfr_chunk(apex)?);
        if axfr.axfr_done() {
            break;
        }
    }
    let borrowed: Vec<&[u8]> = rrs.iter().map(Vec::as_slice).collect();
    Ok(pack_packet(query.id, &query.question, &borrowed, false))
}

/// Resolve a parsed query against a zone database and its IXFR chain.
///
/// - If the client's serial is already at least as new as the zone's current
///   serial (RFC 1982 order, not byte equality: a client can legitimately be
///   ahead of what this chain currently tracks), responds immediately with
///   just the current SOA.
/// - If the chain connects the client's serial to the current serial,
///   returns a streaming state that will emit the full incremental diff.
/// - Otherwise (no chain, a gap, or an unknown zone's SOA being missing)
///   falls back to `axfr`, per RFC 1995 §2's mandatory-fallback requirement.
///   An unknown zone still fails outright, since no responder can answer for
///   a zone this server does not hold.
pub fn resolve_query(
    query: &IxfrQuery,
    db: &dyn ZoneDb,
    chain: &ZoneIxfr,
    current_soa_rr: &[u8],
    axfr: &mut dyn AxfrResponder,
    udp: bool,
    max_packet_size: usize,
) -> Result<QueryOutcome, IxfrError> {
    let apex = db
        .apex_name(&query.qname)
        .ok_or(IxfrError::ZoneNotAuthoritative)?;
    let current_serial = db.current_serial(&apex).ok_or(IxfrError::ZoneCorrupt)?;

    if serial::compare(query.client_serial, current_serial).is_at_least() {
        tracing::debug!(
            zone = ?apex,
            client_serial = %query.client_serial,
            current_serial = %current_serial,
            "client already up to date"
        );
        return Ok(QueryOutcome::Processed(up_to_date_response(
            query,
            current_soa_rr,
        )));
    }

    if !chain.connected(query.client_serial, current_serial) {
        tracing::debug!(
            zone = ?apex,
            client_serial = %query.client_serial,
            current_serial = %current_serial,
            "chain cannot answer request, falling back to AXFR"
        );
        let response = axfr_fallback(query, axfr, &apex)?;
        return Ok(QueryOutcome::Processed(response));
    }

    tracing::debug!(
        zone = ?apex,
        client_serial = %query.client_serial,
        current_serial = %current_serial,
        "serving spliced IXFR response"
    );
    let state = IxfrResponseState::new(
        query.id,
        query.question.clone(),
        chain,
        query.client_serial,
        current_serial,
        current_soa_rr,
        udp,
        max_packet_size,
    )?;
    Ok(QueryOutcome::InIxfr(Box::new(state)))
}

/// Pack a DNS response message with the given answer RRs.
fn pack_packet(id: u16, question: &[u8], rrs: &[&[u8]], truncated: bool) -> Vec<u8> {
    let ancount = rrs.len() as u16;
    let mut flags: u16 = 0x8400; // QR=1, AA=1
    if truncated {
        flags |= 0x0200; // TC=1
    }
    let mut out = Vec::with_capacity(HEADER_LEN + question.len() + rrs.iter().map(|r| r.len()).sum::<usize>());
    out.extend_from_slice(&id.to_be_bytes());
    out.extend_from_slice(&flags.to_be_bytes());
    out.extend_from_slice(&1u16.to_be_bytes()); // QDCOUNT
    out.extend_from_slice(&ancount.to_be_bytes()); // ANCOUNT
    out.extend_from_slice(&0u16.to_be_bytes()); // NSCOUNT
    out.extend_from_slice(&0u16.to_be_bytes()); // ARCOUNT
    out.extend_from_slice(question);
    for rr in rrs {
        out.extend_from_slice(rr);
    }
    out
}

/// The cross-packet state of an in-progress IXFR response.
///
/// The full answer body is flattened once at construction time: the
/// envelope SOA (the zone's current SOA), then for each delta in the walk
/// its `oldsoa` (only for the first delta — every later delta's `oldsoa` is
/// byte-identical to the previous delta's trailing `newsoa` and so is not
/// re-sent), its `del` (ending in that delta's `newsoa`), and its `add`
/// (likewise ending in `newsoa`). [`next_packet`](Self::next_packet) then
/// walks the flattened body one RR at a time, packing as many as fit under
/// `max_packet_size` into each call's result.
///
/// Over UDP, only a single packet is ever produced: if the body does not
/// fit, the cursor rewinds to just past the envelope SOA and a single-RR,
/// truncated packet containing only that SOA is returned, per RFC 1995 §3 /
/// RFC 1035 §4.2.1.
pub struct IxfrResponseState {
    id: u16,
    question: Vec<u8>,
    body: Vec<u8>,
    pos: usize,
    udp: bool,
    max_packet_size: usize,
    done: bool,
}

impl IxfrResponseState {
    #[allow(clippy::too_many_arguments)]
    fn new(
        id: u16,
        question: Vec<u8>,
        chain: &ZoneIxfr,
        old_serial: Serial,
        new_serial: Serial,
        current_soa_rr: &[u8],
        udp: bool,
        max_packet_size: usize,
    ) -> Result<Self, IxfrError> {
        let deltas = chain
            .walk(old_serial, new_serial)
            .ok_or(IxfrError::NoDeltaAvailable)?;
        let mut body = Vec::with_capacity(
            current_soa_rr.len() + deltas.iter().map(|d| d.byte_len()).sum::<usize>(),
        );
        body.extend_from_slice(current_soa_rr);
        for (i, delta) in deltas.iter().enumerate() {
            if i == 0 {
                body.extend_from_slice(&delta.oldsoa);
            }
            body.extend_from_slice(&delta.del);
            body.extend_from_slice(&delta.add);
        }
        Ok(IxfrResponseState {
            id,
            question,
            body,
            pos: 0,
            udp,
            max_packet_size: max_packet_size.max(MIN_PACKET_SIZE),
            done: false,
        })
    }

    /// Whether every RR has already been packed into a returned packet.
    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Pack and return the next response packet, or `None` once the whole
    /// response has been emitted.
    pub fn next_packet(&mut self) -> Option<Vec<u8>> {
        if self.done {
            return None;
        }

        if self.udp {
            return Some(self.next_udp_packet());
        }

        let header_and_question = HEADER_LEN + self.question.len();
        let mut used = header_and_question;
        let mut rrs: Vec<&[u8]> = Vec::new();

        loop {
            if self.pos >= self.body.len() {
                break;
            }
            let len = codec::rr_length(&self.body, self.pos);
            if len == 0 {
                // Our own flattened body is always well-formed; treat this
                // as the end of the stream rather than loop forever.
                self.pos = self.body.len();
                break;
            }
            if used + len > self.max_packet_size {
                if rrs.is_empty() {
                    // A single RR does not fit even alone; TCP messages are
                    // bounded only by the transport's 2-byte length prefix,
                    // not by this nominal packet budget, so emit it anyway.
                } else {
                    break;
                }
            }
            rrs.push(&self.body[self.pos..self.pos + len]);
            used += len;
            self.pos += len;
        }

        if self.pos >= self.body.len() {
            self.done = true;
        }

        Some(pack_packet(self.id, &self.question, &rrs, false))
    }

    /// Produce the single UDP response packet: the whole body if it fits
    /// under `max_packet_size`, or otherwise a truncated packet containing
    /// only the envelope SOA (the body's first RR, which is always the
    /// final/newest SOA), per the RFC 1995 §3 UDP truncation rule.
    fn next_udp_packet(&mut self) -> Vec<u8> {
        self.done = true;

        let header_and_question = HEADER_LEN + self.question.len();
        let mut used = header_and_question;
        let mut rrs: Vec<&[u8]> = Vec::new();
        let mut pos = 0;
        loop {
            if pos >= self.body.len() {
                self.pos = pos;
                return pack_packet(self.id, &self.question, &rrs, false);
            }
            let len = codec::rr_length(&self.body, pos);
            if len == 0 || used + len > self.max_packet_size {
                break;
            }
            rrs.push(&self.body[pos..pos + len]);
            used += len;
            pos += len;
        }

        // Rewind to just past the final-SOA RR (the body's first record)
        // and emit exactly that one RR, truncated.
        let final_soa_len = codec::rr_length(&self.body, 0);
        self.pos = final_soa_len;
        let final_soa = &self.body[0..final_soa_len];
        pack_packet(self.id, &self.question, &[final_soa], true)
    }
}
