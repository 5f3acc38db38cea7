//! ソース行の表示機能

use crate::Result;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

/// 対象行の前後contextを含むソース表示を組み立てる
///
/// 対象行には `>` のカーソルマーカーを付けます。行番号は1始まりです。
pub fn render_source<P: AsRef<Path>>(path: P, line: u64, context: u64) -> Result<String> {
    let path = path.as_ref();
    let file = File::open(path)
        .map_err(|e| anyhow::anyhow!("Failed to open source file {:?}: {}", path, e))?;
    let reader = BufReader::new(file);

    let first = line.saturating_sub(context).max(1);
    let last = line + context;

    let mut output = String::new();

    for (idx, text) in reader.lines().enumerate() {
        let current = idx as u64 + 1;
        if current < first {
            continue;
        }
        if current > last {
            break;
        }

        let text = text?;
        let marker = if current == line { '>' } else { ' ' };
        output.push_str(&format!("{} {:4} {}\n", marker, current, text));
    }

    if output.is_empty() {
        return Err(anyhow::anyhow!(
            "Line {} is out of range for {:?}",
            line,
            path
        ));
    }

    Ok(output)
}

/// ソース行をカーソル付きで標準出力に表示する
pub fn print_source<P: AsRef<Path>>(path: P, line: u64, context: u64) -> Result<()> {
    let rendered = render_source(path, line, context)?;
    print!("{}", rendered);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    fn write_fixture(name: &str, lines: u64) -> std::path::PathBuf {
        let path = std::env::temp_dir().join(format!("sumire-source-test-{}", name));
        let mut file = File::create(&path).unwrap();
        for i in 1..=lines {
            writeln!(file, "line {}", i).unwrap();
        }
        path
    }

    #[test]
    fn test_render_marks_target_line() {
        let path = write_fixture("mark", 10);

        let out = render_source(&path, 5, 2).unwrap();
        let lines: Vec<&str> = out.lines().collect();

        assert_eq!(lines.len(), 5);
        assert!(lines[0].starts_with("     3"));
        assert!(lines[2].starts_with(">    5"));
        assert!(lines[4].starts_with("     7"));

        std::fs::remove_file(path).ok();
    }

    #[test]
    fn test_render_clamps_at_file_start() {
        let path = write_fixture("clamp", 10);

        let out = render_source(&path, 1, 3).unwrap();
        let lines: Vec<&str> = out.lines().collect();

        // 1行目より前には遡らない
        assert_eq!(lines.len(), 4);
        assert!(lines[0].starts_with(">    1"));

        std::fs::remove_file(path).ok();
    }

    #[test]
    fn test_render_out_of_range() {
        let path = write_fixture("range", 3);

        assert!(render_source(&path, 100, 2).is_err());

        std::fs::remove_file(path).ok();
    }

    #[test]
    fn test_render_missing_file() {
        assert!(render_source("/nonexistent/sumire.c", 1, 2).is_err());
    }
}
