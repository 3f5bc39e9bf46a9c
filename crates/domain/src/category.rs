//! Hierarchical content categories.
//!
//! Categories form a forest through a nullable `parent_id` pointer. The
//! traversal helpers here operate on a flat slice of live categories loaded
//! in one query; category sets are small enough that walking parent pointers
//! in memory beats one round trip per level.

use std::collections::{HashMap, HashSet};

use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

use crate::audit::Audit;
use crate::identifiers::CategoryId;

/// Content category
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Category {
    pub id: CategoryId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<CategoryId>,
    pub name: String,
    pub slug: String,
    pub sort_order: i32,
    pub audit: Audit,
}

impl Category {
    /// Build an in-memory category under `parent_id`
    pub fn new(parent_id: Option<CategoryId>, name: impl Into<String>, slug: impl Into<String>) -> Self {
        Self {
            id: CategoryId::new(),
            parent_id,
            name: name.into(),
            slug: slug.into(),
            sort_order: 0,
            audit: Audit::new(Utc::now()),
        }
    }

    /// Build an in-memory top-level category
    pub fn new_root(name: impl Into<String>, slug: impl Into<String>) -> Self {
        Self::new(None, name, slug)
    }

    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }
}

/// A category with its children, as returned by [`build_tree`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryNode {
    pub category: Category,
    pub children: Vec<CategoryNode>,
}

impl CategoryNode {
    /// Number of nodes in this subtree, including the root
    pub fn size(&self) -> usize {
        1 + self.children.iter().map(CategoryNode::size).sum::<usize>()
    }
}

/// Input for creating a category
#[derive(Debug, Clone, Validate, Serialize, Deserialize)]
pub struct NewCategory {
    pub parent_id: Option<CategoryId>,
    #[validate(length(min = 1, max = 64))]
    pub name: String,
    #[validate(custom = "validate_slug")]
    pub slug: String,
    #[serde(default)]
    pub sort_order: i32,
}

/// Partial update for a category; `None` leaves a field unchanged.
///
/// `parent_id: Some(None)` moves the category to the top level.
#[derive(Debug, Clone, Default, Validate, Serialize, Deserialize)]
pub struct CategoryUpdate {
    #[validate(length(min = 1, max = 64))]
    pub name: Option<String>,
    #[validate(custom = "validate_slug")]
    pub slug: Option<String>,
    pub sort_order: Option<i32>,
    pub parent_id: Option<Option<CategoryId>>,
}

/// Which level of the tree to list
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ParentFilter {
    #[default]
    Any,
    /// Top-level categories only
    Root,
    /// Direct children of a category
    Of(CategoryId),
}

/// Filter for category listings
#[derive(Debug, Clone, Default)]
pub struct CategoryFilter {
    pub parent: ParentFilter,
    pub keyword: Option<String>,
}

static SLUG_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z0-9]+(?:-[a-z0-9]+)*$").expect("slug regex"));

/// Slugs are lowercase ASCII letters, digits and single hyphens, at most 100
/// characters.
pub fn validate_slug(slug: &str) -> Result<(), ValidationError> {
    if slug.len() <= 100 && SLUG_REGEX.is_match(slug) {
        Ok(())
    } else {
        Err(ValidationError::new("slug"))
    }
}

fn index(all: &[Category]) -> HashMap<CategoryId, &Category> {
    all.iter().map(|c| (c.id, c)).collect()
}

/// Ancestors of `id`, root first, excluding `id` itself.
///
/// The walk stops at a missing parent and at a revisited node, so corrupted
/// parent pointers cannot loop forever.
pub fn ancestors(all: &[Category], id: CategoryId) -> Vec<Category> {
    let by_id = index(all);
    let mut chain = Vec::new();
    let mut seen = HashSet::from([id]);

    let mut current = by_id.get(&id).and_then(|c| c.parent_id);
    while let Some(parent_id) = current {
        if !seen.insert(parent_id) {
            break;
        }
        match by_id.get(&parent_id) {
            Some(parent) => {
                chain.push((*parent).clone());
                current = parent.parent_id;
            }
            None => break,
        }
    }

    chain.reverse();
    chain
}

/// Ancestors of `id` followed by the category itself; empty when unknown.
pub fn path(all: &[Category], id: CategoryId) -> Vec<Category> {
    let Some(node) = all.iter().find(|c| c.id == id) else {
        return Vec::new();
    };
    let mut chain = ancestors(all, id);
    chain.push(node.clone());
    chain
}

/// Number of ancestors above `id` (0 for a root).
pub fn depth(all: &[Category], id: CategoryId) -> usize {
    ancestors(all, id).len()
}

/// `id` followed by every transitive descendant, breadth first.
pub fn descendant_ids(all: &[Category], id: CategoryId) -> Vec<CategoryId> {
    let mut children: HashMap<CategoryId, Vec<CategoryId>> = HashMap::new();
    for c in all {
        if let Some(parent) = c.parent_id {
            children.entry(parent).or_default().push(c.id);
        }
    }

    let mut result = vec![id];
    let mut seen = HashSet::from([id]);
    let mut cursor = 0;
    while cursor < result.len() {
        if let Some(kids) = children.get(&result[cursor]) {
            for kid in kids {
                if seen.insert(*kid) {
                    result.push(*kid);
                }
            }
        }
        cursor += 1;
    }
    result
}

/// Whether re-parenting `id` under `new_parent` would create a cycle.
pub fn would_create_cycle(all: &[Category], id: CategoryId, new_parent: Option<CategoryId>) -> bool {
    match new_parent {
        None => false,
        Some(parent) => descendant_ids(all, id).contains(&parent),
    }
}

/// Assemble the forest; children are ordered by `sort_order`, then name.
///
/// Categories whose parent is not in `all` are treated as roots.
pub fn build_tree(all: &[Category]) -> Vec<CategoryNode> {
    let known: HashSet<CategoryId> = all.iter().map(|c| c.id).collect();
    let mut children: HashMap<CategoryId, Vec<&Category>> = HashMap::new();
    let mut roots = Vec::new();

    for c in all {
        match c.parent_id {
            Some(parent) if known.contains(&parent) && parent != c.id => {
                children.entry(parent).or_default().push(c)
            }
            _ => roots.push(c),
        }
    }

    fn sorted<'a>(mut nodes: Vec<&'a Category>) -> Vec<&'a Category> {
        nodes.sort_by(|a, b| a.sort_order.cmp(&b.sort_order).then_with(|| a.name.cmp(&b.name)));
        nodes
    }

    fn assemble(
        node: &Category,
        children: &HashMap<CategoryId, Vec<&Category>>,
        visiting: &mut HashSet<CategoryId>,
    ) -> CategoryNode {
        visiting.insert(node.id);
        let kids = children.get(&node.id).cloned().unwrap_or_default();
        let mut built = Vec::with_capacity(kids.len());
        for kid in sorted(kids) {
            if !visiting.contains(&kid.id) {
                built.push(assemble(kid, children, visiting));
            }
        }
        visiting.remove(&node.id);
        CategoryNode {
            category: node.clone(),
            children: built,
        }
    }

    let mut visiting = HashSet::new();
    sorted(roots)
        .into_iter()
        .map(|root| assemble(root, &children, &mut visiting))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    /// news ── world ── asia
    ///      └─ local
    /// sports
    fn fixture() -> (Vec<Category>, [CategoryId; 5]) {
        let news = Category::new_root("News", "news");
        let mut world = Category::new(Some(news.id), "World", "world");
        world.sort_order = 2;
        let mut local = Category::new(Some(news.id), "Local", "local");
        local.sort_order = 1;
        let asia = Category::new(Some(world.id), "Asia", "asia");
        let sports = Category::new_root("Sports", "sports");
        let ids = [news.id, world.id, local.id, asia.id, sports.id];
        (vec![asia, sports, world, news, local], ids)
    }

    #[test]
    fn test_ancestors_root_first() {
        let (all, [news, world, _, asia, _]) = fixture();
        let chain: Vec<_> = ancestors(&all, asia).into_iter().map(|c| c.id).collect();
        assert_eq!(chain, vec![news, world]);
        assert!(ancestors(&all, news).is_empty());
    }

    #[test]
    fn test_path_includes_self() {
        let (all, [news, world, _, asia, _]) = fixture();
        let chain: Vec<_> = path(&all, asia).into_iter().map(|c| c.slug).collect();
        assert_eq!(chain, vec!["news", "world", "asia"]);
        assert_eq!(path(&all, CategoryId::new()).len(), 0);
        assert_eq!(depth(&all, asia), 2);
        assert_eq!(depth(&all, world), 1);
        assert_eq!(depth(&all, news), 0);
    }

    #[test]
    fn test_descendant_ids() {
        let (all, [news, world, local, asia, sports]) = fixture();
        let ids = descendant_ids(&all, news);
        assert_eq!(ids[0], news);
        assert_eq!(ids.len(), 4);
        assert!(ids.contains(&world) && ids.contains(&local) && ids.contains(&asia));
        assert!(!ids.contains(&sports));
        assert_eq!(descendant_ids(&all, asia), vec![asia]);
    }

    #[test]
    fn test_would_create_cycle() {
        let (all, [news, world, _, asia, sports]) = fixture();
        assert!(would_create_cycle(&all, news, Some(asia)));
        assert!(would_create_cycle(&all, world, Some(world)));
        assert!(!would_create_cycle(&all, world, Some(sports)));
        assert!(!would_create_cycle(&all, asia, None));
    }

    #[test]
    fn test_build_tree_orders_children() {
        let (all, [news, _, _, _, _]) = fixture();
        let tree = build_tree(&all);

        assert_eq!(tree.len(), 2);
        assert_eq!(tree[0].category.slug, "news");
        assert_eq!(tree[1].category.slug, "sports");

        let news_node = &tree[0];
        assert_eq!(news_node.category.id, news);
        let child_slugs: Vec<_> = news_node.children.iter().map(|n| n.category.slug.as_str()).collect();
        assert_eq!(child_slugs, vec!["local", "world"]);
        assert_eq!(news_node.size(), 4);
    }

    #[test]
    fn test_build_tree_nests_grandchildren() {
        let (all, [_, world, _, asia, _]) = fixture();
        let tree = build_tree(&all);

        let world_node = tree[0]
            .children
            .iter()
            .find(|n| n.category.id == world)
            .unwrap();
        assert_eq!(world_node.children.len(), 1);
        assert_eq!(world_node.children[0].category.id, asia);
        assert!(world_node.children[0].children.is_empty());
    }

    #[test]
    fn test_build_tree_orphans_become_roots() {
        let orphan = Category::new(Some(CategoryId::new()), "Orphan", "orphan");
        let tree = build_tree(&[orphan]);
        assert_eq!(tree.len(), 1);
        assert!(tree[0].children.is_empty());
    }

    #[test]
    fn test_corrupt_cycle_terminates() {
        let mut a = Category::new_root("A", "a");
        let mut b = Category::new(Some(a.id), "B", "b");
        a.parent_id = Some(b.id);
        b.parent_id = Some(a.id);
        let all = vec![a.clone(), b.clone()];

        assert_eq!(ancestors(&all, a.id).len(), 1);
        assert_eq!(descendant_ids(&all, a.id).len(), 2);
    }

    #[test]
    fn test_validate_slug() {
        assert!(validate_slug("hello-world").is_ok());
        assert!(validate_slug("2024-recap").is_ok());
        assert!(validate_slug("Hello").is_err());
        assert!(validate_slug("a--b").is_err());
        assert!(validate_slug("-a").is_err());
        assert!(validate_slug("").is_err());
        assert!(validate_slug(&"a".repeat(101)).is_err());
    }

    #[test]
    fn test_new_category_validation() {
        let input = NewCategory {
            parent_id: None,
            name: String::new(),
            slug: "ok".to_string(),
            sort_order: 0,
        };
        assert!(input.validate().is_err());

        let input = NewCategory {
            name: "Ok".to_string(),
            ..input
        };
        assert!(input.validate().is_ok());
    }
}
