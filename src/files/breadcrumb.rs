use std::path::{Component, Path};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Crumb {
    pub display_name: String,
    /// Cumulative relative path; `.` for the root crumb.
    pub navigation_path: String,
}

pub fn breadcrumb(root: &Path, relative: &Path) -> Vec<Crumb> {
    let root_name = root
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| root.to_string_lossy().into_owned());
    let mut crumbs = vec![Crumb { display_name: root_name, navigation_path: ".".to_string() }];

    let mut current = String::new();
    for part in relative.components() {
        let Component::Normal(part) = part else { continue };
        let part = part.to_string_lossy();
        if !current.is_empty() {
            current.push('/');
        }
        current.push_str(&part);
        crumbs.push(Crumb { display_name: part.into_owned(), navigation_path: current.clone() });
    }
    crumbs
}
