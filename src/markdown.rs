//! Canonical markdown serialization and its inverse parser.
//!
//! `serialize` turns a page's block set into its `.md` file form; `parse` is
//! total, accepting any text and always producing some block sequence, used
//! both at workspace import and for an explicit user-triggered re-import.

use std::collections::HashMap;
use uuid::Uuid;

use crate::models::block::{Block, BlockKind, Id};

/// Serialize a page's blocks (already loaded, any order) to its canonical
/// markdown form.
pub fn serialize(blocks: &[Block]) -> String {
    let mut children: HashMap<Option<Id>, Vec<&Block>> = HashMap::new();
    for block in blocks {
        children.entry(block.parent_id.clone()).or_default().push(block);
    }
    for siblings in children.values_mut() {
        siblings.sort_by(|a, b| {
            a.order_weight
                .partial_cmp(&b.order_weight)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
    }

    let mut out = String::new();
    render(&children, None, 0, &mut out);
    out
}

fn render(children: &HashMap<Option<Id>, Vec<&Block>>, parent: Option<Id>, depth: usize, out: &mut String) {
    let Some(siblings) = children.get(&parent) else {
        return;
    };

    for block in siblings {
        let indent = "  ".repeat(depth);
        match block.kind {
            BlockKind::Bullet => {
                out.push_str(&indent);
                out.push_str("- ");
                out.push_str(&block.content);
                out.push('\n');
            }
            BlockKind::Code => {
                let lang = block.language.as_deref().unwrap_or("");
                out.push_str(&format!("{indent}```{lang}\n"));
                let content_indent = "  ".repeat(depth + 1);
                for line in block.content.lines() {
                    out.push_str(&content_indent);
                    out.push_str(line);
                    out.push('\n');
                }
                out.push_str(&indent);
                out.push_str("```\n");
            }
            BlockKind::Fence => {
                out.push_str(&indent);
                out.push_str("///\n");
                let content_indent = "  ".repeat(depth + 1);
                for line in block.content.lines() {
                    out.push_str(&content_indent);
                    out.push_str(line);
                    out.push('\n');
                }
                out.push_str(&indent);
                out.push_str("///\n");
            }
        }

        render(children, Some(block.id.clone()), depth + 1, out);
    }
}

/// Parse markdown text into a fresh block sequence for `page_id`. Ids are
/// freshly generated; `order_weight`s are assigned `1.0, 2.0, …` per
/// sibling group in appearance order. A fence whose opening line has no
/// matching close before end-of-input is malformed: it and its would-be
/// body lines are each treated as plain bullets with their literal text.
pub fn parse(content: &str, page_id: &str, now: &str) -> Vec<Block> {
    let lines: Vec<&str> = content.lines().collect();
    let mut blocks = Vec::new();
    let mut parent_stack: Vec<(Id, usize)> = Vec::new();
    let mut order_counters: HashMap<Option<Id>, f64> = HashMap::new();

    let mut i = 0;
    while i < lines.len() {
        let line = lines[i];
        let trimmed = line.trim_start();
        if trimmed.trim_end().is_empty() {
            i += 1;
            continue;
        }
        let depth = (line.len() - trimmed.len()) / 2;

        while let Some((_, parent_depth)) = parent_stack.last() {
            if *parent_depth >= depth {
                parent_stack.pop();
            } else {
                break;
            }
        }
        let parent_id = parent_stack.last().map(|(id, _)| id.clone());

        let trimmed_end = trimmed.trim_end();
        let (kind, language, block_content, consumed) = if let Some(lang) = trimmed_end.strip_prefix("```") {
            match find_fence_close(&lines, i + 1, depth, "```") {
                Some(close_idx) => (BlockKind::Code, non_empty(lang), dedent_fence_body(&lines, i + 1, close_idx, depth), close_idx - i),
                None => (BlockKind::Bullet, None, trimmed_end.to_string(), 0),
            }
        } else if trimmed_end == "///" {
            match find_fence_close(&lines, i + 1, depth, "///") {
                Some(close_idx) => (BlockKind::Fence, None, dedent_fence_body(&lines, i + 1, close_idx, depth), close_idx - i),
                None => (BlockKind::Bullet, None, trimmed_end.to_string(), 0),
            }
        } else if let Some(rest) = trimmed.strip_prefix("- ") {
            (BlockKind::Bullet, None, rest.trim_end().to_string(), 0)
        } else {
            (BlockKind::Bullet, None, trimmed_end.to_string(), 0)
        };

        let id = Uuid::new_v4().to_string();
        let counter = order_counters.entry(parent_id.clone()).or_insert(0.0);
        *counter += 1.0;
        let order_weight = *counter;

        blocks.push(Block {
            id: id.clone(),
            page_id: page_id.to_string(),
            parent_id,
            content: block_content,
            order_weight,
            is_collapsed: false,
            kind,
            language,
            created_at: now.to_string(),
            updated_at: now.to_string(),
        });

        parent_stack.push((id, depth));
        i += 1 + consumed;
    }

    blocks
}

fn non_empty(s: &str) -> Option<String> {
    let s = s.trim();
    if s.is_empty() {
        None
    } else {
        Some(s.to_string())
    }
}

/// Look ahead from `start` for a closing fence line (`close_token` at
/// exactly `depth`). Returns its index, or `None` if none exists before
/// end-of-input, in which case the opening line is malformed and the
/// caller falls back to treating it as a plain bullet.
fn find_fence_close(lines: &[&str], start: usize, depth: usize, close_token: &str) -> Option<usize> {
    let close_line = format!("{}{close_token}", "  ".repeat(depth));
    (start..lines.len()).find(|&i| lines[i].trim_end() == close_line)
}

/// Join and dedent (by `2*(depth+1)`) the lines strictly between an
/// already-located opening and closing fence line.
fn dedent_fence_body(lines: &[&str], start: usize, close_idx: usize, depth: usize) -> String {
    let content_indent_len = 2 * (depth + 1);
    lines[start..close_idx]
        .iter()
        .map(|line| {
            if line.len() >= content_indent_len {
                &line[content_indent_len..]
            } else {
                line.trim_start()
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(id: &str, parent: Option<&str>, content: &str, weight: f64, kind: BlockKind) -> Block {
        Block {
            id: id.to_string(),
            page_id: "p1".to_string(),
            parent_id: parent.map(|s| s.to_string()),
            content: content.to_string(),
            order_weight: weight,
            is_collapsed: false,
            kind,
            language: None,
            created_at: "now".to_string(),
            updated_at: "now".to_string(),
        }
    }

    #[test]
    fn serializes_nested_bullets() {
        let blocks = vec![
            block("a", None, "Top", 1.0, BlockKind::Bullet),
            block("b", Some("a"), "Child", 1.0, BlockKind::Bullet),
        ];
        let md = serialize(&blocks);
        assert_eq!(md, "- Top\n  - Child\n");
    }

    #[test]
    fn serializes_code_block_with_language() {
        let mut b = block("a", None, "let x = 1;\nlet y = 2;", 1.0, BlockKind::Code);
        b.language = Some("rust".to_string());
        let md = serialize(&[b]);
        assert_eq!(md, "```rust\n  let x = 1;\n  let y = 2;\n```\n");
    }

    #[test]
    fn serializes_fence_block() {
        let b = block("a", None, "raw text", 1.0, BlockKind::Fence);
        let md = serialize(&[b]);
        assert_eq!(md, "///\n  raw text\n///\n");
    }

    #[test]
    fn parse_reconstructs_bullet_tree() {
        let md = "- Top\n  - Child\n    - Grandchild\n- Second\n";
        let blocks = parse(md, "p1", "now");
        assert_eq!(blocks.len(), 4);
        assert_eq!(blocks[0].content, "Top");
        assert_eq!(blocks[0].parent_id, None);
        assert_eq!(blocks[1].content, "Child");
        assert_eq!(blocks[1].parent_id.as_deref(), Some(blocks[0].id.as_str()));
        assert_eq!(blocks[2].content, "Grandchild");
        assert_eq!(blocks[2].parent_id.as_deref(), Some(blocks[1].id.as_str()));
        assert_eq!(blocks[3].content, "Second");
        assert_eq!(blocks[3].parent_id, None);
        assert_eq!(blocks[3].order_weight, 2.0);
    }

    #[test]
    fn parse_reconstructs_code_block() {
        let md = "- Header\n  ```rust\n    fn main() {}\n  ```\n";
        let blocks = parse(md, "p1", "now");
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[1].kind, BlockKind::Code);
        assert_eq!(blocks[1].language.as_deref(), Some("rust"));
        assert_eq!(blocks[1].content, "fn main() {}");
    }

    #[test]
    fn parse_reconstructs_fence_block() {
        let md = "///\n  raw text\n  more text\n///\n";
        let blocks = parse(md, "p1", "now");
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].kind, BlockKind::Fence);
        assert_eq!(blocks[0].content, "raw text\nmore text");
    }

    #[test]
    fn unterminated_fence_falls_back_to_plain_bullets() {
        let md = "```rust\n  let x = 1;\n  let y = 2;\n";
        let blocks = parse(md, "p1", "now");
        assert_eq!(blocks.len(), 3);
        assert!(blocks.iter().all(|b| b.kind == BlockKind::Bullet));
        assert_eq!(blocks[0].content, "```rust");
        assert_eq!(blocks[1].content, "let x = 1;");
        assert_eq!(blocks[2].content, "let y = 2;");
    }

    #[test]
    fn unterminated_sentinel_fence_falls_back_to_plain_bullets() {
        let md = "///\n  raw text\n";
        let blocks = parse(md, "p1", "now");
        assert_eq!(blocks.len(), 2);
        assert!(blocks.iter().all(|b| b.kind == BlockKind::Bullet));
        assert_eq!(blocks[0].content, "///");
        assert_eq!(blocks[1].content, "raw text");
    }

    #[test]
    fn parse_treats_plain_lines_as_bullets() {
        let md = "Just some text\n";
        let blocks = parse(md, "p1", "now");
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].kind, BlockKind::Bullet);
        assert_eq!(blocks[0].content, "Just some text");
    }

    #[test]
    fn round_trip_through_serialize_and_parse() {
        let blocks = vec![
            block("h", None, "Heading", 1.0, BlockKind::Bullet),
            block("k", None, "Second", 2.0, BlockKind::Bullet),
            block("h1", Some("h"), "H1", 1.0, BlockKind::Bullet),
            block("h2", Some("h"), "H2", 2.0, BlockKind::Bullet),
            block("h2a", Some("h2"), "H2a", 1.0, BlockKind::Bullet),
        ];
        let md = serialize(&blocks);
        let parsed = parse(&md, "p1", "now");

        assert_eq!(parsed.len(), 5);
        let contents: Vec<_> = parsed.iter().map(|b| b.content.as_str()).collect();
        assert_eq!(contents, vec!["Heading", "H1", "H2", "H2a", "Second"]);

        // Root siblings reassigned 1.0, 2.0 in appearance order.
        let heading = parsed.iter().find(|b| b.content == "Heading").unwrap();
        let second = parsed.iter().find(|b| b.content == "Second").unwrap();
        assert_eq!(heading.order_weight, 1.0);
        assert_eq!(second.order_weight, 2.0);
        assert_eq!(heading.parent_id, None);
        assert_eq!(second.parent_id, None);

        let h2 = parsed.iter().find(|b| b.content == "H2").unwrap();
        let h2a = parsed.iter().find(|b| b.content == "H2a").unwrap();
        assert_eq!(h2a.parent_id.as_deref(), Some(h2.id.as_str()));
    }
}
