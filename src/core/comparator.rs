use super::walker::LocationMap;
use std::io::{self, Write};

/// 取出只在 `source` 中出现的规范名，按字节序排序
///
/// `suppress_dirs` 为真时去掉以 `/` 结尾的目录条目。
pub fn diff(source: &LocationMap, target: &LocationMap, suppress_dirs: bool) -> Vec<String> {
    let mut keys: Vec<&str> = source.keys().collect();
    keys.sort_unstable();

    keys.into_iter()
        .filter(|k| !target.contains(k))
        .filter(|k| !(suppress_dirs && k.ends_with('/')))
        .map(str::to_string)
        .collect()
}

/// 差异统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiffSummary {
    pub files: usize,
    pub dirs: usize,
}

impl DiffSummary {
    pub fn of(entries: &[String]) -> Self {
        let dirs = entries.iter().filter(|e| e.ends_with('/')).count();
        Self {
            files: entries.len() - dirs,
            dirs,
        }
    }

    pub fn total(&self) -> usize {
        self.files + self.dirs
    }
}

/// 输出一段 "只在某站点存在" 的报告
pub fn write_report<W: Write>(out: &mut W, site_name: &str, entries: &[String]) -> io::Result<()> {
    let title = format!("Files/directories only at {}:", site_name);
    writeln!(out, "{}", title)?;
    writeln!(out, "{}", "=".repeat(title.chars().count()))?;
    writeln!(out)?;

    for entry in entries {
        writeln!(out, "{}", entry)?;
    }

    writeln!(out)?;
    writeln!(out)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn maps() -> (LocationMap, LocationMap) {
        let map1: LocationMap = [("string1", "string1map"), ("string2", "string2map")]
            .into_iter()
            .collect();
        let map2: LocationMap = [("string1", "string1map"), ("string3", "string3map")]
            .into_iter()
            .collect();
        (map1, map2)
    }

    #[test]
    fn test_diff_simple() {
        let (map1, map2) = maps();
        assert_eq!(diff(&map1, &map2, false), vec!["string2"]);
        assert_eq!(diff(&map2, &map1, false), vec!["string3"]);
    }

    #[test]
    fn test_diff_sorted_and_idempotent() {
        let source: LocationMap = ["zeta", "Alpha", "beta/", "beta/x", "alpha"]
            .into_iter()
            .map(|k| (k, k))
            .collect();
        let target: LocationMap = [("beta/x", "beta/x")].into_iter().collect();

        let first = diff(&source, &target, false);
        assert_eq!(first, vec!["Alpha", "alpha", "beta/", "zeta"]);
        assert_eq!(first, diff(&source, &target, false));
    }

    #[test]
    fn test_diff_suppress_dirs() {
        let source: LocationMap = [("d/", "d/"), ("d/f", "d/f"), ("g", "g")].into_iter().collect();
        let target = LocationMap::new();

        assert_eq!(diff(&source, &target, false), vec!["d/", "d/f", "g"]);
        assert_eq!(diff(&source, &target, true), vec!["d/f", "g"]);
    }

    #[test]
    fn test_diff_both_directions_with_equal_sizes() {
        let (map1, map2) = maps();
        assert_eq!(map1.len(), map2.len());
        assert!(!diff(&map1, &map2, false).is_empty());
        assert!(!diff(&map2, &map1, false).is_empty());
    }

    #[test]
    fn test_summary() {
        let entries = vec!["a/".to_string(), "a/b".to_string(), "c".to_string()];
        let summary = DiffSummary::of(&entries);
        assert_eq!(summary, DiffSummary { files: 2, dirs: 1 });
        assert_eq!(summary.total(), 3);
    }

    #[test]
    fn test_write_report_format() {
        let (map1, map2) = maps();
        let mut out = Vec::new();
        write_report(&mut out, "X", &diff(&map1, &map2, false)).unwrap();

        assert_eq!(
            String::from_utf8(out).unwrap(),
            "Files/directories only at X:\n============================\n\nstring2\n\n\n"
        );
    }
}
