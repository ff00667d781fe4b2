use crate::files::{breadcrumb::Crumb, DirectoryEntry, ResolvedLocation};
use std::fmt::Write as _;
use std::path::Path;
use std::time::SystemTime;
use time::{macros::format_description, OffsetDateTime};

pub struct PageData<'a> {
    pub location: &'a ResolvedLocation,
    pub roots: Vec<&'a Path>,
    pub breadcrumb: &'a [Crumb],
    pub entries: &'a [DirectoryEntry],
}

pub fn escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

pub fn human_size(n: u64) -> String {
    if n < 1024 {
        return format!("{n} B");
    }
    let suffix = ["KB", "MB", "GB", "TB"];
    let mut f = n as f64;
    for (i, s) in suffix.iter().enumerate() {
        f /= 1024.0;
        if f < 1024.0 || i == suffix.len() - 1 {
            return format!("{f:.1} {s}");
        }
    }
    format!("{n} B")
}

/// Always UTC; the listing header says so.
pub fn fmt_time(t: SystemTime) -> String {
    OffsetDateTime::from(t)
        .format(format_description!("[year]-[month]-[day] [hour]:[minute]"))
        .unwrap_or_default()
}

/// Link to the listing (or file) at `path` under `root`.
pub fn browse_link(root: &Path, path: &str) -> String {
    let root = urlencoding::encode(&root.to_string_lossy()).into_owned();
    if path.is_empty() || path == "." {
        format!("/?root={root}")
    } else {
        format!("/?root={root}&path={}", urlencoding::encode(path))
    }
}

fn download_link(root: &Path, path: &str) -> String {
    format!(
        "/download?root={}&path={}",
        urlencoding::encode(&root.to_string_lossy()),
        urlencoding::encode(path)
    )
}

fn hidden(name: &str, value: &str) -> String {
    format!(r#"<input type="hidden" name="{name}" value="{}" />"#, escape(value))
}

pub fn page(data: &PageData<'_>) -> String {
    let root = data.location.root.as_path();
    let root_str = root.to_string_lossy();
    let current = data.location.relative_display();
    let mut html = String::with_capacity(8 * 1024);

    html.push_str(concat!(
        "<!doctype html>\n<html lang=\"en\">\n<head>\n",
        "<meta charset=\"utf-8\" />\n",
        "<meta name=\"viewport\" content=\"width=device-width, initial-scale=1\" />\n",
        "<title>Porter</title>\n",
        "<style>body{font-family:sans-serif;max-width:72rem;margin:0 auto;padding:1.5rem}",
        "table{width:100%;border-collapse:collapse}td,th{padding:.4rem .8rem;text-align:left;border-bottom:1px solid #ddd}",
        "form{display:inline}.actions{text-align:right}</style>\n",
        "</head>\n<body>\n<header>\n<h1>Porter</h1>\n",
    ));

    html.push_str(r#"<form method="get" action="/"><label>Root: <select name="root">"#);
    for r in &data.roots {
        let r = r.to_string_lossy();
        let selected = if r == root_str { " selected" } else { "" };
        let _ = write!(html, r#"<option value="{0}"{selected}>{0}</option>"#, escape(&r));
    }
    html.push_str(r#"</select></label> <button>Open</button></form>"#);
    html.push_str("\n</header>\n<nav class=\"breadcrumbs\">");
    for (i, c) in data.breadcrumb.iter().enumerate() {
        if i > 0 {
            html.push_str(" / ");
        }
        let _ = write!(
            html,
            r#"<a href="{}">{}</a>"#,
            escape(&browse_link(root, &c.navigation_path)),
            escape(&c.display_name)
        );
    }
    html.push_str("</nav>\n<section>\n");

    let _ = write!(
        html,
        r#"<form action="/upload" method="post" enctype="multipart/form-data">{}{}<input type="file" name="files[]" multiple /> <button>Upload</button></form>"#,
        hidden("root", &root_str),
        hidden("path", &current)
    );
    let _ = write!(
        html,
        r#" <form action="/mkdir" method="post">{}{}<input type="text" name="name" placeholder="New folder" /> <button>Create folder</button></form>"#,
        hidden("root", &root_str),
        hidden("path", &current)
    );
    html.push_str("\n</section>\n<table>\n<thead><tr><th>Name</th><th>Size</th><th>Modified (UTC)</th><th class=\"actions\">Actions</th></tr></thead>\n<tbody>\n");

    if data.entries.is_empty() {
        html.push_str("<tr><td colspan=\"4\">Empty</td></tr>\n");
    }
    for e in data.entries {
        let rel = if current.is_empty() { e.name.clone() } else { format!("{current}/{}", e.name) };
        html.push_str("<tr><td>");
        if e.is_dir {
            let _ = write!(html, r#"<a href="{}">&#128193; {}</a>"#, escape(&browse_link(root, &rel)), escape(&e.name));
        } else {
            let _ = write!(html, r#"<a href="{}">&#128196; {}</a>"#, escape(&download_link(root, &rel)), escape(&e.name));
        }
        let size = if e.is_dir { "-".to_string() } else { human_size(e.size) };
        let _ = write!(html, "</td><td>{size}</td><td>{}</td><td class=\"actions\">", fmt_time(e.modified));
        if !e.is_dir {
            let _ = write!(html, r#"<a href="{}">Download</a> "#, escape(&download_link(root, &rel)));
        }
        let _ = write!(
            html,
            r#"<form action="/zip" method="post">{}{}<button>Zip</button></form> "#,
            hidden("root", &root_str),
            hidden("path", &rel)
        );
        let _ = write!(
            html,
            r#"<form action="/rename" method="post">{}{}{}<input type="text" name="new" placeholder="New name" /> <button>Rename</button></form> "#,
            hidden("root", &root_str),
            hidden("path", &current),
            hidden("old", &e.name)
        );
        let _ = write!(
            html,
            r#"<form action="/delete" method="post" onsubmit="return confirm('Delete this entry? This cannot be undone.');">{}{}{}<button>Delete</button></form>"#,
            hidden("root", &root_str),
            hidden("path", &current),
            hidden("name", &e.name)
        );
        html.push_str("</td></tr>\n");
    }
    html.push_str("</tbody>\n</table>\n</body>\n</html>\n");
    html
}
