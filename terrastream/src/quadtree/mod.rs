//! Level-of-detail quadtree rebuilt around a focus point every frame.
//!
//! Nodes live in a flat arena indexed by [`NodeId`]; parent and child links
//! are indices, so the whole tree is dropped and rebuilt wholesale each
//! frame without any back-pointer bookkeeping. The cache layers underneath
//! persist across rebuilds, which is what makes ancestor fallback work: the
//! tree's shape is volatile, the cached tiles are not.

use glam::Vec2;

use crate::coord::TileId;
use crate::geom::Bounds;

/// Split eagerness. A node splits while `distance(center, focus) * K` is
/// smaller than its edge length, driving nodes near the focus to maximum
/// depth and leaving distant ones coarse.
pub const SPLIT_FACTOR: f32 = 0.75;

/// Index of a node in the tree's arena. Valid only for the tree that
/// produced it, and only for that frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct NodeId(u32);

/// One quadtree cell.
#[derive(Clone, Debug)]
pub struct Node {
    min: Vec2,
    max: Vec2,
    depth: u8,
    tile: TileId,
    parent: Option<NodeId>,
    children: Option<[NodeId; 4]>,
}

impl Node {
    pub fn rect(&self) -> Bounds<Vec2> {
        Bounds::new(self.min, self.max)
    }

    pub fn size(&self) -> Vec2 {
        self.max - self.min
    }

    pub fn center(&self) -> Vec2 {
        self.min + self.size() / 2.0
    }

    pub fn contains(&self, point: Vec2) -> bool {
        self.rect().contains(point)
    }

    pub fn depth(&self) -> u8 {
        self.depth
    }

    /// The tile this cell displays.
    pub fn tile(&self) -> TileId {
        self.tile
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn children(&self) -> Option<[NodeId; 4]> {
        self.children
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_none()
    }
}

/// The per-frame LOD tree.
pub struct QuadTree {
    arena: Vec<Node>,
    max_depth: u8,
}

impl QuadTree {
    /// Builds the tree for one frame.
    ///
    /// The root covers `world` and carries `root_tile`; subdivision follows
    /// the distance heuristic around `focus` down to at most `max_depth`.
    pub fn build(focus: Vec2, world: Bounds<Vec2>, max_depth: u8, root_tile: TileId) -> Self {
        let mut tree = Self {
            arena: vec![Node {
                min: world.min,
                max: world.max,
                depth: 0,
                tile: root_tile,
                parent: None,
                children: None,
            }],
            max_depth,
        };
        tree.insert(NodeId(0), focus);
        tree
    }

    pub fn root(&self) -> NodeId {
        NodeId(0)
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.arena[id.0 as usize]
    }

    pub fn max_depth(&self) -> u8 {
        self.max_depth
    }

    /// Total number of nodes this frame.
    pub fn len(&self) -> usize {
        self.arena.len()
    }

    pub fn is_empty(&self) -> bool {
        self.arena.is_empty()
    }

    fn insert(&mut self, id: NodeId, focus: Vec2) {
        if self.should_split(id, focus) {
            for child in self.split(id) {
                self.insert(child, focus);
            }
        }
    }

    fn should_split(&self, id: NodeId, focus: Vec2) -> bool {
        let node = self.node(id);
        if node.depth >= self.max_depth {
            return false;
        }
        node.center().distance(focus) * SPLIT_FACTOR < node.size().x
    }

    /// Bisects the node on both axes into 4 children.
    ///
    /// Child order matches [`TileId::children`]: x-major, y toward `max`.
    /// The world y axis and the tile y axis both point south, so the
    /// quadrant at the rectangle's `min` corner takes tile `(2x, 2y)`.
    fn split(&mut self, id: NodeId) -> [NodeId; 4] {
        let (min, max, center, child_depth, tiles) = {
            let node = self.node(id);
            debug_assert!(node.is_leaf(), "split of a non-leaf node");
            (
                node.min,
                node.max,
                node.center(),
                node.depth + 1,
                node.tile.children(),
            )
        };

        let rects = [
            (min, center),
            (Vec2::new(center.x, min.y), Vec2::new(max.x, center.y)),
            (Vec2::new(min.x, center.y), Vec2::new(center.x, max.y)),
            (center, max),
        ];

        let mut ids = [NodeId(0); 4];
        for (i, ((child_min, child_max), tile)) in rects.into_iter().zip(tiles).enumerate() {
            let child = NodeId(self.arena.len() as u32);
            self.arena.push(Node {
                min: child_min,
                max: child_max,
                depth: child_depth,
                tile,
                parent: Some(id),
                children: None,
            });
            ids[i] = child;
        }

        self.arena[id.0 as usize].children = Some(ids);
        ids
    }

    /// Depth-first pre-order walk. The visitor returns whether to descend
    /// into the node's children, so a rejected subtree is skipped whole.
    pub fn visit<F>(&self, mut visitor: F)
    where
        F: FnMut(NodeId, &Node) -> bool,
    {
        self.visit_from(self.root(), &mut visitor);
    }

    fn visit_from<F>(&self, id: NodeId, visitor: &mut F)
    where
        F: FnMut(NodeId, &Node) -> bool,
    {
        let node = self.node(id);
        if visitor(id, node) {
            if let Some(children) = node.children {
                for child in children {
                    self.visit_from(child, visitor);
                }
            }
        }
    }

    /// All node ids in pre-order.
    pub fn nodes(&self) -> Vec<NodeId> {
        let mut ids = Vec::with_capacity(self.arena.len());
        self.visit(|id, _| {
            ids.push(id);
            true
        });
        ids
    }

    /// The candidate tile set for this frame.
    pub fn leaves(&self) -> Vec<NodeId> {
        let mut ids = Vec::new();
        self.visit(|id, node| {
            if node.is_leaf() {
                ids.push(id);
            }
            true
        });
        ids
    }
}
