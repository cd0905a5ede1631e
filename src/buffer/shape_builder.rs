//! Nesting structure of buffered values.
//!
//! A [`ShapeBuilder`] records the structure of the data it has seen as a flat
//! token sequence: `Begin` opens a group (one array, one batch), `Finish`
//! closes it, and `Count(n)` records `n` scalars appended at the current
//! depth. Consecutive increments are coalesced, so a buffer holding a
//! million scalars per group stays small.
//!
//! From the tokens the builder derives the dense shape (max count per depth),
//! the runs of positions actually present in a target shape, and COO indices.

use std::fmt;

/// Contiguous `(offset, length)` run in a row-major output tensor.
pub type Run = (usize, usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Token {
    Begin,
    Finish,
    Count(usize),
}

/// Records begin/finish marks and scalar counts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShapeBuilder {
    tokens: Vec<Token>,
    /// Increments not yet flushed into a `Count` token
    pending: usize,
}

/// An open group while walking the tokens.
#[derive(Debug, Clone, Copy)]
struct Group {
    /// Row-major offset of the group's first element
    base: usize,
    /// Children seen so far
    pos: usize,
}

impl ShapeBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a nesting level.
    pub fn begin_mark(&mut self) {
        self.flush();
        self.tokens.push(Token::Begin);
    }

    /// Close the innermost nesting level.
    pub fn finish_mark(&mut self) {
        self.flush();
        self.tokens.push(Token::Finish);
    }

    /// Record one scalar at the current depth.
    pub fn increment(&mut self) {
        self.pending += 1;
    }

    /// Total number of scalars recorded.
    pub fn element_count(&self) -> usize {
        self.iter()
            .map(|t| match t {
                Token::Count(n) => n,
                _ => 0,
            })
            .sum()
    }

    /// Whether any mark has been recorded.
    pub fn is_marked(&self) -> bool {
        self.tokens.iter().any(|t| *t == Token::Begin)
    }

    /// Whether nothing at all has been recorded.
    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty() && self.pending == 0
    }

    /// Maximum nesting depth; 0 for an unmarked sequence.
    pub fn number_of_dimensions(&self) -> usize {
        let mut depth = 0usize;
        let mut max = 0usize;
        for token in self.iter() {
            match token {
                Token::Begin => {
                    depth += 1;
                    max = max.max(depth);
                }
                Token::Finish => depth = depth.saturating_sub(1),
                Token::Count(_) => {}
            }
        }
        max
    }

    /// Per-dimension maximum group size.
    ///
    /// Ragged groups pad up to the largest sibling. An unmarked sequence has
    /// the scalar shape `[]`.
    pub fn dense_shape(&self) -> Vec<usize> {
        let rank = self.number_of_dimensions();
        let mut dims = vec![0usize; rank];
        let mut open: Vec<usize> = Vec::with_capacity(rank);
        for token in self.iter() {
            match token {
                Token::Begin => {
                    if let Some(parent) = open.last_mut() {
                        *parent += 1;
                    }
                    open.push(0);
                }
                Token::Count(n) => {
                    if let Some(group) = open.last_mut() {
                        *group += n;
                    }
                }
                Token::Finish => {
                    if let Some(count) = open.pop() {
                        let dim = &mut dims[open.len()];
                        *dim = (*dim).max(count);
                    }
                }
            }
        }
        dims
    }

    /// Whether every group fills its dimension of `shape` exactly.
    pub fn has_all_elements(&self, shape: &[usize]) -> bool {
        let rank = self.number_of_dimensions();
        if rank == 0 {
            return self.element_count() == shape.iter().product::<usize>();
        }
        if rank != shape.len() {
            return false;
        }
        let mut open: Vec<usize> = Vec::with_capacity(rank);
        for token in self.iter() {
            match token {
                Token::Begin => {
                    if let Some(parent) = open.last_mut() {
                        *parent += 1;
                    }
                    open.push(0);
                }
                Token::Count(n) => {
                    if let Some(group) = open.last_mut() {
                        *group += n;
                    }
                }
                Token::Finish => {
                    if let Some(count) = open.pop() {
                        if count != shape[open.len()] {
                            return false;
                        }
                    }
                }
            }
        }
        true
    }

    /// Runs of positions in a row-major tensor of `shape` that buffered
    /// values occupy, in append order.
    ///
    /// Data may be shallower than `shape` (values land at the first position
    /// of the missing trailing dimensions) but never deeper or wider.
    pub fn copy_info(&self, shape: &[usize]) -> Result<Vec<Run>, String> {
        let total: usize = shape.iter().product();
        let mut runs: Vec<Run> = Vec::new();

        if !self.is_marked() {
            let count = self.element_count();
            if count > total {
                return Err(format!(
                    "{} values do not fit into shape {:?}",
                    count, shape
                ));
            }
            push_run(&mut runs, 0, count);
            return Ok(runs);
        }

        let rank = self.number_of_dimensions();
        if rank > shape.len() {
            return Err(format!(
                "data has {} dimensions but shape {:?} has {}",
                rank,
                shape,
                shape.len()
            ));
        }
        let strides = row_major_strides(shape);
        let mut open: Vec<Group> = Vec::with_capacity(rank);
        let mut seen_top_level = false;

        for token in self.iter() {
            match token {
                Token::Begin => {
                    let base = if open.is_empty() {
                        if seen_top_level {
                            return Err("more than one top-level group".to_string());
                        }
                        seen_top_level = true;
                        0
                    } else {
                        let dim = open_dim(&open);
                        let parent = open
                            .last_mut()
                            .ok_or_else(|| "unbalanced marks".to_string())?;
                        if parent.pos >= shape[dim] {
                            return Err(overflow(parent.pos + 1, dim, shape));
                        }
                        let base = parent.base + parent.pos * strides[dim];
                        parent.pos += 1;
                        base
                    };
                    open.push(Group { base, pos: 0 });
                }
                Token::Count(n) => {
                    if open.is_empty() {
                        return Err("values recorded outside any group".to_string());
                    }
                    let dim = open_dim(&open);
                    let group = open
                        .last_mut()
                        .ok_or_else(|| "unbalanced marks".to_string())?;
                    if group.pos + n > shape[dim] {
                        return Err(overflow(group.pos + n, dim, shape));
                    }
                    let stride = strides[dim];
                    if stride == 1 {
                        push_run(&mut runs, group.base + group.pos, n);
                    } else {
                        for i in 0..n {
                            push_run(&mut runs, group.base + (group.pos + i) * stride, 1);
                        }
                    }
                    group.pos += n;
                }
                Token::Finish => {
                    open.pop();
                }
            }
        }
        Ok(runs)
    }

    /// Runs of positions in a tensor of `shape` that buffered values leave
    /// empty; the complement of [`copy_info`](Self::copy_info).
    pub fn fill_info(&self, shape: &[usize]) -> Result<Vec<Run>, String> {
        let total: usize = shape.iter().product();
        let mut gaps = Vec::new();
        let mut cursor = 0usize;
        for (offset, len) in self.copy_info(shape)? {
            if offset > cursor {
                gaps.push((cursor, offset - cursor));
            }
            cursor = offset + len;
        }
        if cursor < total {
            gaps.push((cursor, total - cursor));
        }
        Ok(gaps)
    }

    /// COO indices of every recorded scalar, flattened row-major.
    ///
    /// Each row has `max(rank, 1)` columns. Coordinates below the depth a
    /// scalar was recorded at are zero. An unmarked sequence yields the
    /// running position of each scalar.
    pub fn indices(&self) -> Vec<i64> {
        let rank = self.number_of_dimensions();
        if rank == 0 {
            return (0..self.element_count() as i64).collect();
        }
        let mut out = Vec::with_capacity(self.element_count() * rank);
        let mut coords = vec![0usize; rank];
        let mut open: Vec<usize> = Vec::with_capacity(rank);
        for token in self.iter() {
            match token {
                Token::Begin => {
                    let depth = open.len();
                    if let Some(parent) = open.last_mut() {
                        coords[depth - 1] = *parent;
                        *parent += 1;
                    }
                    open.push(0);
                }
                Token::Count(n) => {
                    let depth = open.len();
                    let Some(group) = open.last_mut() else {
                        continue;
                    };
                    for _ in 0..n {
                        coords[depth - 1] = *group;
                        *group += 1;
                        out.extend(coords[..depth].iter().map(|&c| c as i64));
                        out.extend(std::iter::repeat(0).take(rank - depth));
                    }
                }
                Token::Finish => {
                    open.pop();
                }
            }
        }
        out
    }

    /// Append `other` at the top level.
    ///
    /// When both sides are wrapped in a top-level group, the two groups fuse
    /// into one, so per-shard builders merge into the builder a single
    /// unsharded run would have produced.
    pub fn merge(&mut self, other: &ShapeBuilder) {
        if other.is_empty() {
            return;
        }
        if self.is_empty() {
            *self = other.clone();
            return;
        }
        if !self.is_marked() && !other.is_marked() {
            self.pending += other.element_count();
            return;
        }

        self.flush();
        let mut incoming: Vec<Token> = other.iter().collect();
        if self.tokens.last() == Some(&Token::Finish) && incoming.first() == Some(&Token::Begin) {
            self.tokens.pop();
            incoming.remove(0);
        }
        for token in incoming {
            self.push(token);
        }
    }

    fn flush(&mut self) {
        if self.pending > 0 {
            let n = std::mem::take(&mut self.pending);
            self.push(Token::Count(n));
        }
    }

    fn push(&mut self, token: Token) {
        match (token, self.tokens.last_mut()) {
            (Token::Count(0), _) => {}
            (Token::Count(n), Some(Token::Count(m))) => *m += n,
            _ => self.tokens.push(token),
        }
    }

    fn iter(&self) -> impl Iterator<Item = Token> + '_ {
        self.tokens
            .iter()
            .copied()
            .chain((self.pending > 0).then_some(Token::Count(self.pending)))
    }
}

impl fmt::Display for ShapeBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for token in self.iter() {
            match token {
                Token::Begin => f.write_str("[")?,
                Token::Finish => f.write_str("]")?,
                Token::Count(n) => write!(f, "{}", n)?,
            }
        }
        Ok(())
    }
}

/// Dimension indexed by the children of the innermost open group.
fn open_dim(open: &[Group]) -> usize {
    open.len() - 1
}

fn overflow(needed: usize, dim: usize, shape: &[usize]) -> String {
    format!(
        "{} elements in dimension {} exceed shape {:?}",
        needed, dim, shape
    )
}

fn push_run(runs: &mut Vec<Run>, offset: usize, len: usize) {
    if len == 0 {
        return;
    }
    if let Some(last) = runs.last_mut() {
        if last.0 + last.1 == offset {
            last.1 += len;
            return;
        }
    }
    runs.push((offset, len));
}

fn row_major_strides(shape: &[usize]) -> Vec<usize> {
    let mut strides = vec![1usize; shape.len()];
    for i in (0..shape.len().saturating_sub(1)).rev() {
        strides[i] = strides[i + 1] * shape[i + 1];
    }
    strides
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Batch of ragged arrays: `[[a, b, c], [], [d]]`.
    fn ragged() -> ShapeBuilder {
        let mut b = ShapeBuilder::new();
        b.begin_mark();
        for len in [3, 0, 1] {
            b.begin_mark();
            for _ in 0..len {
                b.increment();
            }
            b.finish_mark();
        }
        b.finish_mark();
        b
    }

    #[test]
    fn test_unmarked_is_scalar() {
        let mut b = ShapeBuilder::new();
        b.increment();
        assert_eq!(b.number_of_dimensions(), 0);
        assert_eq!(b.dense_shape(), Vec::<usize>::new());
        assert!(b.has_all_elements(&[]));
        assert_eq!(b.copy_info(&[]).unwrap(), vec![(0, 1)]);
    }

    #[test]
    fn test_dense_shape_pads_to_max() {
        let b = ragged();
        assert_eq!(b.number_of_dimensions(), 2);
        assert_eq!(b.dense_shape(), vec![3, 3]);
        assert_eq!(b.element_count(), 4);
        assert_eq!(b.to_string(), "[[3][][1]]");
    }

    #[test]
    fn test_has_all_elements() {
        let b = ragged();
        assert!(!b.has_all_elements(&[3, 3]));

        let mut full = ShapeBuilder::new();
        full.begin_mark();
        for _ in 0..2 {
            full.begin_mark();
            full.increment();
            full.increment();
            full.finish_mark();
        }
        full.finish_mark();
        assert!(full.has_all_elements(&[2, 2]));
        assert!(!full.has_all_elements(&[2, 3]));
        assert!(!full.has_all_elements(&[4]));
    }

    #[test]
    fn test_copy_and_fill_info() {
        let b = ragged();
        assert_eq!(b.copy_info(&[3, 3]).unwrap(), vec![(0, 3), (6, 1)]);
        assert_eq!(b.fill_info(&[3, 3]).unwrap(), vec![(3, 3), (7, 2)]);
        // Wider target shape
        assert_eq!(b.copy_info(&[3, 4]).unwrap(), vec![(0, 3), (8, 1)]);
    }

    #[test]
    fn test_copy_info_rejects_overflow() {
        let b = ragged();
        assert!(b.copy_info(&[3, 2]).is_err());
        assert!(b.copy_info(&[2, 3]).is_err());
        assert!(b.copy_info(&[9]).is_err());
    }

    #[test]
    fn test_copy_info_shallow_data() {
        // One scalar per record placed into [batch, 2]
        let mut b = ShapeBuilder::new();
        b.begin_mark();
        b.increment();
        b.increment();
        b.finish_mark();
        assert_eq!(b.copy_info(&[2, 2]).unwrap(), vec![(0, 1), (2, 1)]);
    }

    #[test]
    fn test_indices() {
        let b = ragged();
        assert_eq!(b.indices(), vec![0, 0, 0, 1, 0, 2, 2, 0]);

        let mut flat = ShapeBuilder::new();
        flat.begin_mark();
        flat.increment();
        flat.increment();
        flat.finish_mark();
        assert_eq!(flat.indices(), vec![0, 1]);
    }

    #[test]
    fn test_merge_fuses_top_level_groups() {
        let mut whole = ShapeBuilder::new();
        whole.begin_mark();
        for _ in 0..4 {
            whole.increment();
        }
        whole.finish_mark();

        let mut left = ShapeBuilder::new();
        let mut right = ShapeBuilder::new();
        for b in [&mut left, &mut right] {
            b.begin_mark();
            b.increment();
            b.increment();
            b.finish_mark();
        }
        left.merge(&right);
        assert_eq!(left, whole);
    }

    #[test]
    fn test_merge_with_empty_shard() {
        let mut empty_shard = ShapeBuilder::new();
        empty_shard.begin_mark();
        empty_shard.finish_mark();

        let mut merged = ragged();
        merged.merge(&empty_shard);
        assert_eq!(merged, ragged());

        let mut from_empty = empty_shard.clone();
        from_empty.merge(&ragged());
        assert_eq!(from_empty, ragged());
    }

    #[test]
    fn test_merge_unmarked() {
        let mut a = ShapeBuilder::new();
        a.increment();
        let mut b = ShapeBuilder::new();
        b.increment();
        b.increment();
        a.merge(&b);
        assert_eq!(a.element_count(), 3);
        assert!(!a.is_marked());
    }
}
