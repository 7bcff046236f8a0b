//! Wire-level encoding and decoding for the MPD text protocol: command
//! lines, `key: value` response lines, `ACK` errors and command-list
//! framing. No knowledge of TCP lifecycle lives here; see
//! [`super::connection::Connection`] for that.

use tokio::io::{AsyncBufReadExt, AsyncWriteExt};

use super::{MpdError, MpdResult};

/// One `key: value` response line.
pub type Field = (String, String);

/// Quote a single command argument per MPD convention: wrap in `"..."`,
/// escaping `\` and `"`.
pub fn quote(arg: &str) -> String {
    let mut out = String::with_capacity(arg.len() + 2);
    out.push('"');
    for c in arg.chars() {
        if c == '\\' || c == '"' {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('"');
    out
}

/// Render one command line, e.g. `seek "3" "10.500"`.
pub fn render_command(name: &str, args: &[&str]) -> String {
    let mut line = String::from(name);
    for arg in args {
        line.push(' ');
        line.push_str(&quote(arg));
    }
    line.push('\n');
    line
}

pub async fn write_command<W: tokio::io::AsyncWrite + Unpin>(
    writer: &mut W,
    name: &str,
    args: &[&str],
) -> MpdResult<()> {
    let line = render_command(name, args);
    writer.write_all(line.as_bytes()).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one block of `key: value` lines up to (and consuming) a
/// terminating `OK` or `ACK ...` line. An `ACK` line is surfaced as
/// [`MpdError::Protocol`].
pub async fn read_block<R: AsyncBufReadExt + Unpin>(reader: &mut R) -> MpdResult<Vec<Field>> {
    let mut fields = Vec::new();
    loop {
        let mut line = String::new();
        let n = reader.read_line(&mut line).await?;
        if n == 0 {
            return Err(MpdError::UnexpectedEof);
        }
        let line = line.trim_end_matches(['\r', '\n']);
        if line == "OK" {
            return Ok(fields);
        }
        if let Some(rest) = line.strip_prefix("ACK ") {
            return Err(MpdError::Protocol {
                line: rest.to_owned(),
            });
        }
        match line.split_once(": ") {
            Some((key, value)) => fields.push((key.to_owned(), value.to_owned())),
            None => {
                return Err(MpdError::Protocol {
                    line: line.to_owned(),
                })
            }
        }
    }
}

/// Read the response to a `command_list_ok_begin ... command_list_end`
/// batch: one field-block per queued command, each terminated by
/// `list_OK`, with a final `OK` closing the whole batch.
pub async fn read_command_list_response<R: AsyncBufReadExt + Unpin>(
    reader: &mut R,
) -> MpdResult<Vec<Vec<Field>>> {
    let mut blocks = Vec::new();
    let mut current = Vec::new();
    loop {
        let mut line = String::new();
        let n = reader.read_line(&mut line).await?;
        if n == 0 {
            return Err(MpdError::UnexpectedEof);
        }
        let line = line.trim_end_matches(['\r', '\n']);
        if line == "OK" {
            blocks.push(current);
            return Ok(blocks);
        }
        if line == "list_OK" {
            blocks.push(std::mem::take(&mut current));
            continue;
        }
        if let Some(rest) = line.strip_prefix("ACK ") {
            return Err(MpdError::Protocol {
                line: rest.to_owned(),
            });
        }
        match line.split_once(": ") {
            Some((key, value)) => current.push((key.to_owned(), value.to_owned())),
            None => {
                return Err(MpdError::Protocol {
                    line: line.to_owned(),
                })
            }
        }
    }
}

/// Split a `playlistinfo`/`plchanges`-style field block into per-entry
/// chunks on repetition of a leading key.
pub fn split_entries(fields: Vec<Field>, leading_key: &str) -> Vec<Vec<Field>> {
    let mut entries: Vec<Vec<Field>> = Vec::new();
    for field in fields {
        if field.0 == leading_key {
            entries.push(vec![field]);
        } else if let Some(last) = entries.last_mut() {
            last.push(field);
        }
    }
    entries
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn quote_escapes_backslash_and_quote() {
        assert_eq!(quote(r#"a"b\c"#), r#""a\"b\\c""#);
    }

    #[test]
    fn render_command_joins_quoted_args() {
        assert_eq!(render_command("seek", &["3", "10.5"]), "seek \"3\" \"10.5\"\n");
    }

    #[test]
    fn split_entries_groups_by_leading_key() {
        let fields = vec![
            ("file".into(), "a.mp3".into()),
            ("Id".into(), "1".into()),
            ("file".into(), "b.mp3".into()),
            ("Id".into(), "2".into()),
        ];
        let entries = split_entries(fields, "file");
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0][0], ("file".into(), "a.mp3".into()));
        assert_eq!(entries[1][0], ("file".into(), "b.mp3".into()));
    }
}
