use crate::api::Category;

/// Ordered, duplicate-free set of chosen categories. Used by the filter bar
/// and by the story form; identity is the category id.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SelectionSet {
    items: Vec<Category>,
}

impl SelectionSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_categories(categories: &[Category]) -> Self {
        let mut set = Self::new();
        for category in categories {
            set.add(category.clone());
        }
        set
    }

    pub fn add(&mut self, category: Category) {
        if self.contains(&category.id) {
            return;
        }
        self.items.push(category);
    }

    pub fn remove(&mut self, id: &str) {
        self.items.retain(|category| category.id != id);
    }

    pub fn contains(&self, id: &str) -> bool {
        self.items.iter().any(|category| category.id == id)
    }

    pub fn list(&self) -> &[Category] {
        &self.items
    }

    pub fn ids(&self) -> Vec<String> {
        self.items.iter().map(|category| category.id.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }
}

/// Case-insensitive prefix autocomplete over the full category set,
/// skipping entries already selected. An empty term yields nothing so the
/// suggestion list only appears once the user starts typing.
pub fn suggest(all: &[Category], term: &str, selected: &SelectionSet) -> Vec<Category> {
    if term.is_empty() {
        return Vec::new();
    }
    let needle = term.to_lowercase();
    all.iter()
        .filter(|category| category.name.to_lowercase().starts_with(&needle))
        .filter(|category| !selected.contains(&category.id))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn category(id: &str, name: &str) -> Category {
        Category {
            id: id.into(),
            name: name.into(),
        }
    }

    #[test]
    fn add_is_idempotent() {
        let mut set = SelectionSet::new();
        set.add(category("1", "Food"));
        set.add(category("1", "Food"));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn add_preserves_insertion_order() {
        let mut set = SelectionSet::new();
        set.add(category("2", "Festival"));
        set.add(category("1", "Food"));
        set.add(category("3", "Art"));
        let names: Vec<&str> = set.list().iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["Festival", "Food", "Art"]);
    }

    #[test]
    fn remove_missing_id_is_a_noop() {
        let mut set = SelectionSet::new();
        set.add(category("1", "Food"));
        set.remove("nope");
        assert_eq!(set.len(), 1);
        set.remove("1");
        assert!(set.is_empty());
    }

    #[test]
    fn suggest_matches_prefix_case_insensitively() {
        let all = vec![category("1", "Food"), category("2", "Festival")];
        let selected = SelectionSet::new();
        let hits = suggest(&all, "fo", &selected);
        assert_eq!(hits, vec![category("1", "Food")]);
        let hits = suggest(&all, "FES", &selected);
        assert_eq!(hits, vec![category("2", "Festival")]);
    }

    #[test]
    fn suggest_excludes_selected_categories() {
        let all = vec![category("1", "Food"), category("2", "Festival")];
        let mut selected = SelectionSet::new();
        selected.add(category("1", "Food"));
        let hits = suggest(&all, "f", &selected);
        assert_eq!(hits, vec![category("2", "Festival")]);
    }

    #[test]
    fn suggest_empty_term_yields_nothing() {
        let all = vec![category("1", "Food")];
        let hits = suggest(&all, "", &SelectionSet::new());
        assert!(hits.is_empty());
    }

    #[test]
    fn suggest_preserves_input_order() {
        let all = vec![
            category("3", "Music"),
            category("1", "Markets"),
            category("2", "Museums"),
        ];
        let hits = suggest(&all, "m", &SelectionSet::new());
        let ids: Vec<&str> = hits.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["3", "1", "2"]);
    }
}
