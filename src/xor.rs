//! XOR parity accumulation and recovery (spec §4.1).
//!
//! A *span* is `xorgc * xorsc` consecutive data blocks followed by `xorgc`
//! parity blocks. Group `g` accumulates the XOR of every data block whose
//! `(seqno - 1) mod xorgc == g` within the current span. This module holds
//! the pure accumulator math; sequencing (deferred blocks, lost-block
//! reporting) lives in `reader::mod`.

use crate::block::Baseline;

/// XOR-assign `src` into `dst` in place, four bytes at a time where
/// possible. Block bodies are always a multiple of 4 bytes and at least
/// 16 bytes (§9), so this never needs a scalar tail loop in practice, but
/// one is included for robustness.
pub fn xor_assign(dst: &mut [u8], src: &[u8]) {
    assert_eq!(dst.len(), src.len());
    let chunks = dst.len() / 4;
    for i in 0..chunks {
        let off = i * 4;
        let d = u32::from_ne_bytes(dst[off..off + 4].try_into().unwrap());
        let s = u32::from_ne_bytes(src[off..off + 4].try_into().unwrap());
        dst[off..off + 4].copy_from_slice(&(d ^ s).to_ne_bytes());
    }
    for i in chunks * 4..dst.len() {
        dst[i] ^= src[i];
    }
}

#[derive(Debug, Clone)]
struct Accumulator {
    body: Vec<u8>,
}

impl Accumulator {
    fn new(len: usize) -> Self {
        Self { body: vec![0u8; len] }
    }
    fn reset(&mut self) {
        self.body.iter_mut().for_each(|b| *b = 0);
    }
    fn xor_in(&mut self, data: &[u8]) {
        xor_assign(&mut self.body, data);
    }
    fn is_zero(&self) -> bool {
        self.body.iter().all(|&b| b == 0)
    }
}

/// Writer-side state: accumulates data block bodies and hands back parity
/// block bodies at span close.
pub struct WriterXorState {
    baseline: Baseline,
    groups: Vec<Accumulator>,
    observed: Vec<u8>,
    next_xorno: u32,
}

/// One parity block ready to be stamped and written.
pub struct ParityBlock {
    pub xorno: u32,
    pub xorbc: u8,
    pub body: Vec<u8>,
}

impl WriterXorState {
    pub fn new(baseline: Baseline, body_len: usize) -> Self {
        let xorgc = baseline.xorgc as usize;
        Self {
            baseline,
            groups: (0..xorgc).map(|_| Accumulator::new(body_len)).collect(),
            observed: vec![0u8; xorgc],
            next_xorno: 0,
        }
    }

    /// Feed one data block's body into its parity group. `seqno` is
    /// 1-based and dense.
    pub fn accumulate(&mut self, seqno: u32, body: &[u8]) {
        if self.baseline.xorgc == 0 {
            return;
        }
        let g = ((seqno - 1) % self.baseline.xorgc as u32) as usize;
        self.groups[g].xor_in(body);
        self.observed[g] += 1;
    }

    /// `true` when the data block just accumulated with this `seqno`
    /// closes the current span (every group has seen `xorsc` blocks).
    pub fn span_closes(&self, seqno: u32) -> bool {
        self.baseline.xorgc != 0 && seqno % self.baseline.span_data_blocks() == 0
    }

    /// Emit one parity block per group and reset all accumulators. Must
    /// only be called when [`span_closes`] just returned `true`.
    pub fn close_span(&mut self) -> Vec<ParityBlock> {
        let mut out = Vec::with_capacity(self.groups.len());
        for (i, g) in self.groups.iter_mut().enumerate() {
            out.push(ParityBlock {
                xorno: self.next_xorno + i as u32 + 1,
                xorbc: self.observed[i],
                body: g.body.clone(),
            });
            g.reset();
        }
        self.next_xorno += self.baseline.xorgc as u32;
        self.observed.iter_mut().for_each(|o| *o = 0);
        out
    }
}

/// Outcome of closing a parity group on the reader side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GroupOutcome {
    /// Exactly one data block was missing; `body` is the reconstructed
    /// data block body.
    Recovered(Vec<u8>),
    /// No data blocks were missing; parity verified as all-zero.
    Verified,
    /// No data blocks were missing, but the parity did not come out to
    /// zero — corruption the hash check did not catch (should not
    /// happen with a sound hasher, but the invariant is checked anyway).
    Mismatch,
    /// More than one data block missing within this group/span; nothing
    /// can be reconstructed.
    Unrecoverable,
}

/// Reader-side recovery state: one accumulator + observed-count per group,
/// reset whenever the incoming block indicates a new span.
pub struct ReaderXorState {
    baseline: Baseline,
    groups: Vec<Accumulator>,
    counts: Vec<u32>,
    current_span: Option<u32>,
}

impl ReaderXorState {
    pub fn new(baseline: Baseline, body_len: usize) -> Self {
        let xorgc = baseline.xorgc.max(1) as usize;
        Self {
            baseline,
            groups: (0..xorgc).map(|_| Accumulator::new(body_len)).collect(),
            counts: vec![0u32; xorgc],
            current_span: None,
        }
    }

    fn maybe_rollover(&mut self, span: u32) {
        if self.current_span != Some(span) {
            self.groups.iter_mut().for_each(Accumulator::reset);
            self.counts.iter_mut().for_each(|c| *c = 0);
            self.current_span = Some(span);
        }
    }

    /// Record a data block's body. Returns the parity group index it was
    /// filed under.
    pub fn observe_data(&mut self, seqno: u32, body: &[u8]) -> usize {
        let span = (seqno - 1) / self.baseline.span_data_blocks();
        self.maybe_rollover(span);
        let g = ((seqno - 1) % self.baseline.xorgc as u32) as usize;
        self.groups[g].xor_in(body);
        self.counts[g] += 1;
        g
    }

    /// Close a parity group on arrival of its parity block. `xorbc` is
    /// the number of data blocks the writer XORed into this parity block.
    pub fn observe_parity(&mut self, xorno: u32, xorbc: u8, body: &[u8]) -> GroupOutcome {
        let span = (xorno - 1) / self.baseline.xorgc as u32;
        self.maybe_rollover(span);
        let g = ((xorno - 1) % self.baseline.xorgc as u32) as usize;
        let observed = self.counts[g];
        let outcome = if observed + 1 == xorbc as u32 {
            self.groups[g].xor_in(body);
            GroupOutcome::Recovered(self.groups[g].body.clone())
        } else if observed == xorbc as u32 {
            self.groups[g].xor_in(body);
            if self.groups[g].is_zero() {
                GroupOutcome::Verified
            } else {
                GroupOutcome::Mismatch
            }
        } else {
            GroupOutcome::Unrecoverable
        };
        self.groups[g].reset();
        self.counts[g] = 0;
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn baseline(xorgc: u8, xorsc: u8) -> Baseline {
        Baseline { l2bs: 12, xorgc, xorsc }
    }

    #[test]
    fn xor_assign_roundtrips() {
        let a = vec![0xAAu8; 20];
        let mut acc = vec![0u8; 20];
        xor_assign(&mut acc, &a);
        assert_eq!(acc, a);
        xor_assign(&mut acc, &a);
        assert_eq!(acc, vec![0u8; 20]);
    }

    #[test]
    fn single_loss_recovers() {
        let bl = baseline(1, 3);
        let body_len = 16;
        let blocks: Vec<Vec<u8>> = (0..3u8).map(|i| vec![i.wrapping_mul(17) + 1; body_len]).collect();

        let mut w = WriterXorState::new(bl, body_len);
        for (i, b) in blocks.iter().enumerate() {
            w.accumulate(i as u32 + 1, b);
        }
        assert!(w.span_closes(3));
        let parity = w.close_span();
        assert_eq!(parity.len(), 1);
        assert_eq!(parity[0].xorbc, 3);

        // Reader loses block 2 (seqno=2, index 1).
        let mut r = ReaderXorState::new(bl, body_len);
        r.observe_data(1, &blocks[0]);
        r.observe_data(3, &blocks[2]);
        let outcome = r.observe_parity(parity[0].xorno, parity[0].xorbc, &parity[0].body);
        match outcome {
            GroupOutcome::Recovered(body) => assert_eq!(body, blocks[1]),
            other => panic!("expected recovery, got {other:?}"),
        }
    }

    #[test]
    fn dual_loss_in_one_group_is_unrecoverable() {
        let bl = baseline(1, 3);
        let body_len = 16;
        let blocks: Vec<Vec<u8>> = (0..3u8).map(|i| vec![i + 9; body_len]).collect();
        let mut w = WriterXorState::new(bl, body_len);
        for (i, b) in blocks.iter().enumerate() {
            w.accumulate(i as u32 + 1, b);
        }
        let parity = w.close_span();

        let mut r = ReaderXorState::new(bl, body_len);
        r.observe_data(1, &blocks[0]); // only one of three seen
        let outcome = r.observe_parity(parity[0].xorno, parity[0].xorbc, &parity[0].body);
        assert_eq!(outcome, GroupOutcome::Unrecoverable);
    }

    #[test]
    fn no_loss_verifies_zero() {
        let bl = baseline(1, 2);
        let body_len = 8;
        let blocks: Vec<Vec<u8>> = vec![vec![5u8; body_len], vec![9u8; body_len]];
        let mut w = WriterXorState::new(bl, body_len);
        w.accumulate(1, &blocks[0]);
        w.accumulate(2, &blocks[1]);
        let parity = w.close_span();

        let mut r = ReaderXorState::new(bl, body_len);
        r.observe_data(1, &blocks[0]);
        r.observe_data(2, &blocks[1]);
        let outcome = r.observe_parity(parity[0].xorno, parity[0].xorbc, &parity[0].body);
        assert_eq!(outcome, GroupOutcome::Verified);
    }

    #[test]
    fn independent_groups_recover_separately() {
        // xorgc=2: group0 gets seqno 1,3; group1 gets seqno 2,4.
        let bl = baseline(2, 2);
        let body_len = 8;
        let blocks: Vec<Vec<u8>> = (1..=4u8).map(|i| vec![i * 3; body_len]).collect();
        let mut w = WriterXorState::new(bl, body_len);
        for (i, b) in blocks.iter().enumerate() {
            w.accumulate(i as u32 + 1, b);
        }
        assert!(w.span_closes(4));
        let parity = w.close_span();
        assert_eq!(parity.len(), 2);

        // Lose block with seqno=3 (group 0).
        let mut r = ReaderXorState::new(bl, body_len);
        r.observe_data(1, &blocks[0]);
        r.observe_data(2, &blocks[1]);
        r.observe_data(4, &blocks[3]);
        for p in &parity {
            let outcome = r.observe_parity(p.xorno, p.xorbc, &p.body);
            if p.xorno % 2 == 1 {
                // group 0: saw only seqno=1, missing seqno=3
                assert_eq!(outcome, GroupOutcome::Recovered(blocks[2].clone()));
            } else {
                assert_eq!(outcome, GroupOutcome::Verified);
            }
        }
    }
}
