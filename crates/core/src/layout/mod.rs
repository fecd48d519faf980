#![forbid(unsafe_code)]

//! Tidy tree layout (Walker's algorithm with the Buchheim-Jünger-Leipert
//! linear-time apportioning).
//!
//! The first walk runs bottom-up over the nodes in reverse breadth-first
//! order, which visits every child before its parent. Each parent places its
//! children left to right, merging subtree contours through threads and
//! recording pending shifts that `execute_shifts` spreads over intermediate
//! siblings. The second walk runs top-down and accumulates modifiers into
//! final x coordinates. Both walks are iterative and linear in the node count.

use crate::ids::NodeId;
use crate::tree::Hierarchy;
use std::collections::{BTreeMap, HashMap};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum Orientation {
    /// Depth grows along +y.
    #[default]
    TopDown,
    /// Depth grows along +x.
    LeftRight,
}

impl Orientation {
    pub fn as_str(self) -> &'static str {
        match self {
            Orientation::TopDown => "top-down",
            Orientation::LeftRight => "left-right",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "top-down" | "topdown" | "vertical" => Some(Orientation::TopDown),
            "left-right" | "leftright" | "horizontal" => Some(Orientation::LeftRight),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LayoutConfig {
    /// Minimum distance between adjacent siblings on one row.
    pub sibling_gap: f64,
    /// Minimum distance between adjacent nodes of different parents.
    pub subtree_gap: f64,
    /// Distance between consecutive depth rows.
    pub row_height: f64,
    pub orientation: Orientation,
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            sibling_gap: 120.0,
            subtree_gap: 160.0,
            row_height: 240.0,
            orientation: Orientation::TopDown,
        }
    }
}

impl LayoutConfig {
    pub fn validate(&self) -> Result<(), LayoutError> {
        let positive = |value: f64| value.is_finite() && value > 0.0;
        if !positive(self.sibling_gap) {
            return Err(LayoutError::InvalidConfig("sibling_gap must be positive"));
        }
        if !positive(self.subtree_gap) {
            return Err(LayoutError::InvalidConfig("subtree_gap must be positive"));
        }
        if self.subtree_gap < self.sibling_gap {
            return Err(LayoutError::InvalidConfig(
                "subtree_gap must not be smaller than sibling_gap",
            ));
        }
        if !positive(self.row_height) {
            return Err(LayoutError::InvalidConfig("row_height must be positive"));
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LayoutError {
    #[error("invalid layout config: {0}")]
    InvalidConfig(&'static str),
    #[error("hierarchy references unknown node {0}")]
    UnknownNode(NodeId),
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Bounds {
    pub min: Point,
    pub max: Point,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Positions {
    points: BTreeMap<NodeId, Point>,
    bounds: Bounds,
}

impl Positions {
    pub fn get(&self, id: &NodeId) -> Option<Point> {
        self.points.get(id).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&NodeId, Point)> {
        self.points.iter().map(|(id, point)| (id, *point))
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn bounds(&self) -> Bounds {
        self.bounds
    }
}

const NONE: usize = usize::MAX;

struct Slot {
    parent: usize,
    children: Vec<usize>,
    depth: u32,
    /// Index among siblings.
    number: usize,
    prelim: f64,
    modifier: f64,
    shift: f64,
    change: f64,
    thread: usize,
    ancestor: usize,
}

struct Walker<'a> {
    slots: Vec<Slot>,
    config: &'a LayoutConfig,
}

impl Walker<'_> {
    fn is_leaf(&self, v: usize) -> bool {
        self.slots[v].children.is_empty()
    }

    fn next_left(&self, v: usize) -> usize {
        self.slots[v]
            .children
            .first()
            .copied()
            .unwrap_or(self.slots[v].thread)
    }

    fn next_right(&self, v: usize) -> usize {
        self.slots[v]
            .children
            .last()
            .copied()
            .unwrap_or(self.slots[v].thread)
    }

    fn distance(&self, a: usize, b: usize) -> f64 {
        if self.slots[a].parent == self.slots[b].parent {
            self.config.sibling_gap
        } else {
            self.config.subtree_gap
        }
    }

    fn left_sibling(&self, v: usize) -> usize {
        let slot = &self.slots[v];
        if slot.parent == NONE || slot.number == 0 {
            return NONE;
        }
        self.slots[slot.parent].children[slot.number - 1]
    }

    fn leftmost_sibling(&self, v: usize) -> usize {
        let parent = self.slots[v].parent;
        if parent == NONE {
            return v;
        }
        self.slots[parent].children[0]
    }

    /// Places every child of `v` against its left sibling, merges contours,
    /// then centers `v` over its children. Children must already be walked.
    fn first_walk(&mut self, v: usize) {
        if self.is_leaf(v) {
            self.slots[v].prelim = 0.0;
            return;
        }
        let children = self.slots[v].children.clone();
        let mut default_ancestor = children[0];
        for (i, &child) in children.iter().enumerate() {
            if i > 0 {
                let left = children[i - 1];
                let midpoint = self.slots[child].prelim;
                let placed = self.slots[left].prelim + self.config.sibling_gap;
                self.slots[child].prelim = placed;
                if !self.slots[child].children.is_empty() {
                    self.slots[child].modifier = placed - midpoint;
                }
            }
            default_ancestor = self.apportion(child, default_ancestor);
        }
        let first = children[0];
        let last = children[children.len() - 1];
        self.execute_shifts(v);
        self.slots[v].prelim = (self.slots[first].prelim + self.slots[last].prelim) / 2.0;
    }

    fn apportion(&mut self, v: usize, mut default_ancestor: usize) -> usize {
        let w = self.left_sibling(v);
        if w == NONE {
            return default_ancestor;
        }
        let mut vir = v;
        let mut vor = v;
        let mut vil = w;
        let mut vol = self.leftmost_sibling(v);
        let mut sir = self.slots[vir].modifier;
        let mut sor = self.slots[vor].modifier;
        let mut sil = self.slots[vil].modifier;
        let mut sol = self.slots[vol].modifier;

        while self.next_right(vil) != NONE && self.next_left(vir) != NONE {
            vil = self.next_right(vil);
            vir = self.next_left(vir);
            vol = self.next_left(vol);
            vor = self.next_right(vor);
            self.slots[vor].ancestor = v;
            let shift = (self.slots[vil].prelim + sil) - (self.slots[vir].prelim + sir)
                + self.distance(vil, vir);
            if shift > 0.0 {
                let ancestor = self.ancestor_of(vil, v, default_ancestor);
                self.move_subtree(ancestor, v, shift);
                sir += shift;
                sor += shift;
            }
            sil += self.slots[vil].modifier;
            sir += self.slots[vir].modifier;
            sol += self.slots[vol].modifier;
            sor += self.slots[vor].modifier;
        }

        if self.next_right(vil) != NONE && self.next_right(vor) == NONE {
            self.slots[vor].thread = self.next_right(vil);
            self.slots[vor].modifier += sil - sor;
        }
        if self.next_left(vir) != NONE && self.next_left(vol) == NONE {
            self.slots[vol].thread = self.next_left(vir);
            self.slots[vol].modifier += sir - sol;
            default_ancestor = v;
        }
        default_ancestor
    }

    fn ancestor_of(&self, vil: usize, v: usize, default_ancestor: usize) -> usize {
        let candidate = self.slots[vil].ancestor;
        if self.slots[candidate].parent == self.slots[v].parent {
            candidate
        } else {
            default_ancestor
        }
    }

    /// Shifts subtree `wr` right and records a proportional change for the
    /// subtrees between `wl` and `wr`, applied later by `execute_shifts`.
    fn move_subtree(&mut self, wl: usize, wr: usize, shift: f64) {
        let subtrees = self.slots[wr].number.saturating_sub(self.slots[wl].number);
        let subtrees = subtrees.max(1) as f64;
        self.slots[wr].change -= shift / subtrees;
        self.slots[wr].shift += shift;
        self.slots[wl].change += shift / subtrees;
        self.slots[wr].prelim += shift;
        self.slots[wr].modifier += shift;
    }

    fn execute_shifts(&mut self, v: usize) {
        let mut shift = 0.0;
        let mut change = 0.0;
        for i in (0..self.slots[v].children.len()).rev() {
            let w = self.slots[v].children[i];
            let slot = &mut self.slots[w];
            slot.prelim += shift;
            slot.modifier += shift;
            change += slot.change;
            shift += slot.shift + change;
        }
    }
}

/// Lays out `hierarchy` and returns one point per node.
pub fn layout(hierarchy: &Hierarchy, config: &LayoutConfig) -> Result<Positions, LayoutError> {
    config.validate()?;

    // Breadth-first numbering: parents precede children.
    let mut order: Vec<&NodeId> = vec![hierarchy.root()];
    let mut index: HashMap<&NodeId, usize> = HashMap::from([(hierarchy.root(), 0)]);
    let mut cursor = 0;
    while cursor < order.len() {
        for child in hierarchy.children(order[cursor]) {
            index.insert(child, order.len());
            order.push(child);
        }
        cursor += 1;
    }

    let mut slots = Vec::with_capacity(order.len());
    for (i, id) in order.iter().enumerate() {
        if hierarchy.node(id).is_none() {
            return Err(LayoutError::UnknownNode((*id).clone()));
        }
        let mut children = Vec::with_capacity(hierarchy.children(id).len());
        for child in hierarchy.children(id) {
            match index.get(child) {
                Some(&slot) => children.push(slot),
                None => return Err(LayoutError::UnknownNode(child.clone())),
            }
        }
        slots.push(Slot {
            parent: NONE,
            children,
            depth: 0,
            number: 0,
            prelim: 0.0,
            modifier: 0.0,
            shift: 0.0,
            change: 0.0,
            thread: NONE,
            ancestor: i,
        });
    }
    for v in 0..slots.len() {
        let depth = slots[v].depth;
        for number in 0..slots[v].children.len() {
            let child = slots[v].children[number];
            slots[child].parent = v;
            slots[child].number = number;
            slots[child].depth = depth + 1;
        }
    }

    let mut walker = Walker { slots, config };
    for v in (0..walker.slots.len()).rev() {
        walker.first_walk(v);
    }

    // Second walk: parents precede children in `order`, so accumulated
    // modifiers are final by the time a child is reached.
    let slots = walker.slots;
    let mut mod_sum = vec![0.0f64; slots.len()];
    let mut xs = vec![0.0f64; slots.len()];
    for v in 0..slots.len() {
        xs[v] = slots[v].prelim + mod_sum[v];
        let inherited = mod_sum[v] + slots[v].modifier;
        for &child in &slots[v].children {
            mod_sum[child] = inherited;
        }
    }

    let min_x = xs.iter().copied().fold(f64::INFINITY, f64::min);
    let mut points = BTreeMap::new();
    let mut bounds = Bounds {
        min: Point {
            x: f64::INFINITY,
            y: f64::INFINITY,
        },
        max: Point {
            x: f64::NEG_INFINITY,
            y: f64::NEG_INFINITY,
        },
    };
    for (v, id) in order.iter().enumerate() {
        let across = xs[v] - min_x;
        let along = f64::from(slots[v].depth) * config.row_height;
        let point = match config.orientation {
            Orientation::TopDown => Point {
                x: across,
                y: along,
            },
            Orientation::LeftRight => Point {
                x: along,
                y: across,
            },
        };
        bounds.min.x = bounds.min.x.min(point.x);
        bounds.min.y = bounds.min.y.min(point.y);
        bounds.max.x = bounds.max.x.max(point.x);
        bounds.max.y = bounds.max.y.max(point.y);
        points.insert((*id).clone(), point);
    }

    Ok(Positions { points, bounds })
}
