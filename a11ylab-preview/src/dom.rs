use a11ylab_markup::NodeId;
use scraper::{ElementRef, Html};
use std::collections::HashMap;

/// A parsed document plus a dense index over its elements, so scripts can refer to elements
/// by small integers instead of tree ids.
pub(crate) struct DomIndex {
    pub html: Html,
    nodes: Vec<NodeId>,
    positions: HashMap<NodeId, usize>,
}

impl DomIndex {
    pub fn new(html: Html) -> Self {
        let nodes: Vec<NodeId> = html
            .root_element()
            .descendants()
            .filter_map(ElementRef::wrap)
            .map(|e| e.id())
            .collect();
        let positions = nodes.iter().enumerate().map(|(i, id)| (*id, i)).collect();
        Self {
            html,
            nodes,
            positions,
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn element(&self, index: usize) -> Option<ElementRef<'_>> {
        let id = *self.nodes.get(index)?;
        self.html.tree.get(id).and_then(ElementRef::wrap)
    }

    pub fn index_of(&self, id: NodeId) -> Option<usize> {
        self.positions.get(&id).copied()
    }
}
