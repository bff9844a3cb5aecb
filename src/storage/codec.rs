//! Storage member encoding.
//!
//! ```text
//! container = { [tag] [key: text] [body] } [End]
//! list body = [element tag] { [tag] [body] } [End]
//! field body = value bytes (fixed width, or [u32 len][payload])
//! ```
//!
//! Decoding walks the tree with an explicit stack, so sibling count never
//! grows the call stack. Running out of bytes exactly where a tag is expected
//! ends the current level as if an End tag had been read.
//!
//! Nesting deeper than the caller's `max_depth` is rejected while decoding.
//! Encoding, comparing and dropping a tree recurse once per level.

use std::io::{Read, Write};

use crate::core::stream::{StreamReader, StreamWriter};
use crate::error::{constants, ProtocolError, Result};
use crate::storage::member::{Container, Field, List, Member, MemberTag};

/// Stage the children of `container` followed by the End tag.
pub fn encode_container<W: Write>(stream: &mut StreamWriter<W>, container: &Container) -> Result<()> {
    for (key, member) in container.iter() {
        encode_member(stream, Some(key), member)?;
    }
    stream.write_u8(MemberTag::End.as_byte());
    Ok(())
}

fn encode_member<W: Write>(
    stream: &mut StreamWriter<W>,
    key: Option<&str>,
    member: &Member,
) -> Result<()> {
    stream.write_u8(member.tag().as_byte());
    if let Some(key) = key {
        stream.write_text(key)?;
    }
    match member {
        Member::Field(field) => stream.write_value(field.value()),
        Member::Container(container) => encode_container(stream, container),
        Member::List(list) => {
            stream.write_u8(list.element().as_byte());
            for item in list.iter() {
                encode_member(stream, None, item)?;
            }
            stream.write_u8(MemberTag::End.as_byte());
            Ok(())
        }
    }
}

enum Level {
    Container {
        key: Option<String>,
        container: Container,
    },
    List {
        key: Option<String>,
        list: List,
    },
}

impl Level {
    fn is_keyed(&self) -> bool {
        matches!(self, Level::Container { .. })
    }

    fn attach(&mut self, key: Option<String>, member: Member) -> Result<()> {
        match (self, key) {
            (Level::Container { container, .. }, Some(key)) => container.insert_new(key, member),
            (Level::List { list, .. }, None) => list.push(member),
            _ => Err(ProtocolError::Storage(
                "member key does not match its parent".to_string(),
            )),
        }
    }

    fn finish(self) -> (Option<String>, Member) {
        match self {
            Level::Container { key, container } => (key, Member::Container(container)),
            Level::List { key, list } => (key, Member::List(list)),
        }
    }
}

/// Next tag, or `None` when the cursor is exhausted at a tag boundary.
fn read_tag<R: Read>(stream: &mut StreamReader<R>) -> Result<Option<MemberTag>> {
    if stream.remaining() == 0 {
        return Ok(None);
    }
    MemberTag::from_byte(stream.read_u8()?).map(Some)
}

/// Decode a container body (children up to and including its End tag).
///
/// The decoded container sits at depth 0; its nested containers and lists may
/// go `max_depth` levels deep.
///
/// # Errors
/// - `UnknownMemberTag` for reserved or unknown tags
/// - `Truncated` when the data ends inside a member
/// - `Storage` for duplicate keys, list elements of the wrong tag, or nesting
///   beyond `max_depth`
pub fn decode_container<R: Read>(stream: &mut StreamReader<R>, max_depth: usize) -> Result<Container> {
    let mut stack = vec![Level::Container {
        key: None,
        container: Container::new(),
    }];

    loop {
        let tag = read_tag(stream)?.unwrap_or(MemberTag::End);

        if tag == MemberTag::End {
            let Some(done) = stack.pop() else {
                return Err(ProtocolError::Storage("unbalanced storage levels".to_string()));
            };
            match stack.last_mut() {
                Some(parent) => {
                    let (key, member) = done.finish();
                    parent.attach(key, member)?;
                }
                None => {
                    return match done.finish() {
                        (_, Member::Container(root)) => Ok(root),
                        _ => Err(ProtocolError::Storage("root is not a container".to_string())),
                    };
                }
            }
            continue;
        }

        let depth = stack.len();
        let Some(parent) = stack.last_mut() else {
            return Err(ProtocolError::Storage("unbalanced storage levels".to_string()));
        };
        let key = if parent.is_keyed() {
            Some(stream.read_text()?)
        } else {
            None
        };

        if matches!(tag, MemberTag::Container | MemberTag::List) && depth > max_depth {
            return Err(ProtocolError::Storage(format!(
                "{} of {max_depth}",
                constants::ERR_TOO_DEEP
            )));
        }

        match tag {
            MemberTag::Container => stack.push(Level::Container {
                key,
                container: Container::new(),
            }),
            MemberTag::List => {
                let element = MemberTag::from_byte(stream.read_u8()?)?;
                stack.push(Level::List {
                    key,
                    list: List::new(element)?,
                });
            }
            field_tag => {
                let kind = field_tag
                    .value_kind()
                    .ok_or(ProtocolError::UnknownMemberTag(field_tag.as_byte()))?;
                let field = Field::new(stream.read_value(&kind)?)?;
                parent.attach(key, Member::Field(field))?;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_MAX_DEPTH;
    use std::io;

    #[allow(clippy::unwrap_used)]
    fn encode(container: &Container) -> Vec<u8> {
        let mut stream = StreamWriter::new(io::sink(), true);
        encode_container(&mut stream, container).unwrap();
        stream.take_staging()
    }

    fn decode(bytes: Vec<u8>) -> Result<Container> {
        decode_container(&mut StreamReader::from_bytes(bytes), DEFAULT_MAX_DEPTH)
    }

    fn nested(depth: usize) -> Vec<u8> {
        let mut bytes = Vec::new();
        for _ in 0..depth {
            bytes.extend_from_slice(&[1, 1, 0, 0, 0, b'd']);
        }
        bytes
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn test_field_layout() {
        let root = Container::new().with("n", Member::field(7i32).unwrap()).unwrap();
        let bytes = encode(&root);
        assert_eq!(
            bytes,
            vec![
                9, // Int
                1, 0, 0, 0, b'n', // key
                7, 0, 0, 0, // value
                0, // End
            ]
        );
        assert_eq!(decode(bytes).unwrap(), root);
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn test_nested_round_trip() {
        let mut inner = List::new(MemberTag::Container).unwrap();
        inner
            .push(Container::new().with("x", Member::field(1.5f32).unwrap()).unwrap())
            .unwrap();
        inner.push(Container::new()).unwrap();

        let root = Container::new()
            .with("names", List::of_values(MemberTag::String, ["a", "b"]).unwrap())
            .unwrap()
            .with("points", inner)
            .unwrap()
            .with("empty", List::new(MemberTag::Long).unwrap())
            .unwrap()
            .with("blob", Member::field(vec![1u8, 2, 3]).unwrap())
            .unwrap();

        assert_eq!(decode(encode(&root)).unwrap(), root);
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn test_missing_end_tags_at_eof() {
        let child = Container::new().with("v", Member::field(true).unwrap()).unwrap();
        let root = Container::new().with("c", child).unwrap();
        let mut bytes = encode(&root);
        // Both End tags (child and root) dropped.
        bytes.truncate(bytes.len() - 2);
        assert_eq!(decode(bytes).unwrap(), root);
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn test_empty_input_is_empty_root() {
        let root = decode(Vec::new()).unwrap();
        assert!(root.is_empty());
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn test_truncated_inside_member() {
        let root = Container::new().with("k", Member::field(9u64).unwrap()).unwrap();
        let mut bytes = encode(&root);
        bytes.truncate(bytes.len() - 4);
        assert!(decode(bytes).unwrap_err().is_truncation());
    }

    #[test]
    fn test_reserved_tags_rejected() {
        assert!(matches!(
            decode(vec![3, 1, 0, 0, 0, b'k']),
            Err(ProtocolError::UnknownMemberTag(3))
        ));
        assert!(matches!(
            decode(vec![17]),
            Err(ProtocolError::UnknownMemberTag(17))
        ));
    }

    #[test]
    fn test_list_element_mismatch() {
        // List "l" of Int holding a Byte.
        let bytes = vec![2, 1, 0, 0, 0, b'l', 9, 7, 1, 0, 0];
        assert!(matches!(decode(bytes), Err(ProtocolError::Storage(_))));
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn test_nesting_up_to_max_depth() {
        let depth = DEFAULT_MAX_DEPTH;
        let mut level = decode(nested(depth)).unwrap();
        for _ in 0..depth {
            level = match level.remove("d") {
                Some(Member::Container(c)) => c,
                other => panic!("expected container, got {other:?}"),
            };
        }
        assert!(level.is_empty());
    }

    #[test]
    fn test_nesting_beyond_max_depth() {
        let err = decode(nested(DEFAULT_MAX_DEPTH + 1)).unwrap_err();
        assert!(matches!(err, ProtocolError::Storage(_)));

        // Lists count as levels too.
        let mut bytes = nested(3);
        bytes.extend_from_slice(&[2, 1, 0, 0, 0, b'l', 9]);
        assert!(decode_container(&mut StreamReader::from_bytes(bytes.clone()), 4).is_ok());
        assert!(matches!(
            decode_container(&mut StreamReader::from_bytes(bytes), 3),
            Err(ProtocolError::Storage(_))
        ));
    }

    #[test]
    fn test_oversized_nesting_fails_before_end() {
        // A million levels fit well inside a frame but are refused at the cap.
        let err = decode(nested(1_000_000)).unwrap_err();
        assert!(matches!(err, ProtocolError::Storage(_)));
    }
}
