//! Row Set
//!
//! Tracks which rows belong to which tree node. All rows live in one buffer,
//! each node owns a contiguous extent of it.
use crate::errors::HistError;

/// Extent of the row buffer owned by a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Elem {
    pub begin: usize,
    pub end: usize,
    pub node_id: usize,
}

impl Elem {
    pub fn size(&self) -> usize {
        self.end - self.begin
    }
}

#[derive(Debug, Default)]
pub struct RowSetCollection {
    row_indices: Vec<usize>,
    elems: Vec<Option<Elem>>,
}

impl RowSetCollection {
    pub fn new() -> Self {
        RowSetCollection::default()
    }

    pub fn clear(&mut self) {
        self.row_indices.clear();
        self.elems.clear();
    }

    /// Row buffer, to be filled before calling `init`.
    pub fn data_mut(&mut self) -> &mut Vec<usize> {
        &mut self.row_indices
    }

    pub fn data(&self) -> &[usize] {
        &self.row_indices
    }

    /// Assign every row of the buffer to the root.
    pub fn init(&mut self) {
        self.elems.clear();
        self.elems.push(Some(Elem {
            begin: 0,
            end: self.row_indices.len(),
            node_id: 0,
        }));
    }

    pub fn elem(&self, nid: usize) -> Result<Elem, HistError> {
        self.elems.get(nid).copied().flatten().ok_or(HistError::UnknownNode(nid))
    }

    pub fn size(&self, nid: usize) -> Result<usize, HistError> {
        Ok(self.elem(nid)?.size())
    }

    pub fn elements(&self, nid: usize) -> Result<&[usize], HistError> {
        let e = self.elem(nid)?;
        Ok(&self.row_indices[e.begin..e.end])
    }

    /// Stable partition of the rows of `nid` into `left` and `right`.
    /// The parent keeps its extent, the children own its two halves.
    pub fn add_split<F>(&mut self, nid: usize, left: usize, right: usize, goes_left: F) -> Result<(), HistError>
    where
        F: Fn(usize) -> bool,
    {
        let e = self.elem(nid)?;
        let extent = &mut self.row_indices[e.begin..e.end];
        let (mut left_rows, right_rows): (Vec<usize>, Vec<usize>) = extent.iter().partition(|r| goes_left(**r));
        let n_left = left_rows.len();
        left_rows.extend_from_slice(&right_rows);
        extent.copy_from_slice(&left_rows);

        let needed = left.max(right) + 1;
        if self.elems.len() < needed {
            self.elems.resize(needed, None);
        }
        self.elems[left] = Some(Elem {
            begin: e.begin,
            end: e.begin + n_left,
            node_id: left,
        });
        self.elems[right] = Some(Elem {
            begin: e.begin + n_left,
            end: e.end,
            node_id: right,
        });
        Ok(())
    }
}
