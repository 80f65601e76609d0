//! Remote path helpers
//!
//! Remote paths are always `/`-separated, independent of the local platform.

/// Expand a leading `/~` to the home directory
///
/// `/~/in` with home `/home/user` becomes `/home/user/in`. Anything else is
/// returned unchanged.
pub fn expand_home(home: &str, path: &str) -> String {
    match path.strip_prefix("/~") {
        Some(rest) => format!("{}{}", home.trim_end_matches('/'), rest),
        None => path.to_string(),
    }
}

/// Join `name` onto `dir`
pub fn join(dir: &str, name: &str) -> String {
    let name = name.trim_start_matches("./");
    if name.is_empty() || name == "." {
        return dir.to_string();
    }
    if name.starts_with('/') {
        return name.to_string();
    }
    if dir.is_empty() {
        return name.to_string();
    }
    if dir.ends_with('/') {
        format!("{dir}{name}")
    } else {
        format!("{dir}/{name}")
    }
}

/// Resolve `path` against a working directory and home, collapsing `.` and `..`
pub fn resolve(cwd: &str, home: &str, path: &str) -> String {
    let expanded = expand_home(home, path);
    let joined = if expanded.starts_with('/') {
        expanded
    } else {
        join(cwd, &expanded)
    };
    normalize(&joined)
}

/// Collapse `.`, `..` and duplicate separators of an absolute path
pub fn normalize(path: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for component in path.split('/') {
        match component {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            other => parts.push(other),
        }
    }
    format!("/{}", parts.join("/"))
}

/// Parent directory of an absolute path (`/` for top-level entries)
pub fn parent(path: &str) -> String {
    let normalized = normalize(path);
    match normalized.rfind('/') {
        Some(0) | None => "/".to_string(),
        Some(idx) => normalized[..idx].to_string(),
    }
}

/// Final component of a path
pub fn file_name(path: &str) -> &str {
    path.trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expand_home() {
        assert_eq!(expand_home("/home/user", "/~/in"), "/home/user/in");
        assert_eq!(expand_home("/home/user/", "/~/in"), "/home/user/in");
        assert_eq!(expand_home("/home/user", "/~"), "/home/user");
        assert_eq!(expand_home("/home/user", "/data/in"), "/data/in");
        assert_eq!(expand_home("/home/user", "in"), "in");
    }

    #[test]
    fn test_join() {
        assert_eq!(join("/data", "a.txt"), "/data/a.txt");
        assert_eq!(join("/data/", "a.txt"), "/data/a.txt");
        assert_eq!(join("/data", "/abs/a.txt"), "/abs/a.txt");
        assert_eq!(join("/data", "./a.txt"), "/data/a.txt");
        assert_eq!(join("/data", "."), "/data");
    }

    #[test]
    fn test_resolve() {
        assert_eq!(resolve("/data", "/home/u", "in"), "/data/in");
        assert_eq!(resolve("/data", "/home/u", "../x"), "/x");
        assert_eq!(resolve("/data", "/home/u", "/~/in"), "/home/u/in");
        assert_eq!(resolve("/data/in", "/home/u", "."), "/data/in");
        assert_eq!(resolve("/", "/home/u", ".."), "/");
    }

    #[test]
    fn test_normalize() {
        assert_eq!(normalize("/a//b/./c/.."), "/a/b");
        assert_eq!(normalize("/"), "/");
    }

    #[test]
    fn test_parent_and_file_name() {
        assert_eq!(parent("/data/in/a.txt"), "/data/in");
        assert_eq!(parent("/a.txt"), "/");
        assert_eq!(file_name("/data/in/a.txt"), "a.txt");
        assert_eq!(file_name("a.txt"), "a.txt");
        assert_eq!(file_name("/data/in/"), "in");
    }
}
