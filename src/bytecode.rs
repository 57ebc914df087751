//! Binary encoding of compiled chunks.
//!
//! A serialized chunk is a self-describing record: a magic/version header,
//! the code bytes, the constant table (each entry tagged by kind, nested
//! chunks encoded recursively), and the parameter-name list. Lengths and
//! counts are little-endian `u32`. `decode(encode(chunk))` round-trips
//! exactly.

use std::rc::Rc;

use crate::compiler::{Chunk, Constant};
use crate::error::Error;

const MAGIC: &[u8; 4] = b"FLXB";
const VERSION: u8 = 1;

/// Guard against pathological nesting in hand-crafted artifacts.
const MAX_CHUNK_DEPTH: usize = 100;

const TAG_INT: u8 = 0;
const TAG_STR: u8 = 1;
const TAG_BOOL: u8 = 2;
const TAG_CHUNK: u8 = 3;

pub fn encode(chunk: &Chunk) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(MAGIC);
    out.push(VERSION);
    encode_chunk(chunk, &mut out);
    out
}

fn encode_chunk(chunk: &Chunk, out: &mut Vec<u8>) {
    write_bytes(&chunk.code, out);

    write_u32(chunk.constants.len() as u32, out);
    for constant in &chunk.constants {
        match constant {
            Constant::Int(v) => {
                out.push(TAG_INT);
                out.extend_from_slice(&v.to_le_bytes());
            }
            Constant::Str(s) => {
                out.push(TAG_STR);
                write_bytes(s.as_bytes(), out);
            }
            Constant::Bool(b) => {
                out.push(TAG_BOOL);
                out.push(u8::from(*b));
            }
            Constant::Chunk(sub) => {
                out.push(TAG_CHUNK);
                encode_chunk(sub, out);
            }
        }
    }

    write_u32(chunk.params.len() as u32, out);
    for param in &chunk.params {
        write_bytes(param.as_bytes(), out);
    }
}

fn write_u32(value: u32, out: &mut Vec<u8>) {
    out.extend_from_slice(&value.to_le_bytes());
}

fn write_bytes(bytes: &[u8], out: &mut Vec<u8>) {
    write_u32(bytes.len() as u32, out);
    out.extend_from_slice(bytes);
}

pub fn decode(bytes: &[u8]) -> Result<Chunk, Error> {
    let mut reader = Reader { bytes, pos: 0 };

    let magic = reader.read_bytes(MAGIC.len())?;
    if magic != MAGIC {
        return Err(Error::Decode("not a Flux bytecode artifact".into()));
    }
    let version = reader.read_u8()?;
    if version != VERSION {
        return Err(Error::Decode(format!(
            "unsupported bytecode version {version} (expected {VERSION})"
        )));
    }

    let chunk = decode_chunk(&mut reader, 0)?;
    if reader.pos != reader.bytes.len() {
        return Err(Error::Decode(format!(
            "{} trailing byte(s) after chunk",
            reader.bytes.len() - reader.pos
        )));
    }
    Ok(chunk)
}

fn decode_chunk(reader: &mut Reader<'_>, depth: usize) -> Result<Chunk, Error> {
    if depth > MAX_CHUNK_DEPTH {
        return Err(Error::Decode("chunk nesting too deep".into()));
    }

    let code = reader.read_len_prefixed()?.to_vec();

    let constant_count = reader.read_u32()?;
    let mut constants = Vec::with_capacity(constant_count.min(1024) as usize);
    for _ in 0..constant_count {
        let tag = reader.read_u8()?;
        let constant = match tag {
            TAG_INT => {
                let raw = reader.read_bytes(8)?;
                let mut buf = [0u8; 8];
                buf.copy_from_slice(raw);
                Constant::Int(i64::from_le_bytes(buf))
            }
            TAG_STR => Constant::Str(reader.read_string()?),
            TAG_BOOL => Constant::Bool(reader.read_u8()? != 0),
            TAG_CHUNK => Constant::Chunk(Rc::new(decode_chunk(reader, depth + 1)?)),
            other => return Err(Error::Decode(format!("unknown constant tag {other}"))),
        };
        constants.push(constant);
    }

    let param_count = reader.read_u32()?;
    let mut params = Vec::with_capacity(param_count.min(1024) as usize);
    for _ in 0..param_count {
        params.push(reader.read_string()?);
    }

    Ok(Chunk {
        code,
        constants,
        params,
    })
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn read_u8(&mut self) -> Result<u8, Error> {
        let b = self
            .bytes
            .get(self.pos)
            .copied()
            .ok_or_else(|| Error::Decode("unexpected end of input".into()))?;
        self.pos += 1;
        Ok(b)
    }

    fn read_u32(&mut self) -> Result<u32, Error> {
        let raw = self.read_bytes(4)?;
        let mut buf = [0u8; 4];
        buf.copy_from_slice(raw);
        Ok(u32::from_le_bytes(buf))
    }

    fn read_bytes(&mut self, n: usize) -> Result<&'a [u8], Error> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|end| *end <= self.bytes.len())
            .ok_or_else(|| Error::Decode("unexpected end of input".into()))?;
        let slice = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn read_len_prefixed(&mut self) -> Result<&'a [u8], Error> {
        let len = self.read_u32()? as usize;
        self.read_bytes(len)
    }

    fn read_string(&mut self) -> Result<String, Error> {
        let raw = self.read_len_prefixed()?;
        String::from_utf8(raw.to_vec())
            .map_err(|_| Error::Decode("invalid UTF-8 in string".into()))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::compiler::compile;
    use crate::lexer::lex;
    use crate::parser::parse;

    fn compile_src(src: &str) -> Chunk {
        compile(&parse(lex(src).unwrap()).unwrap()).unwrap()
    }

    #[test]
    fn round_trip_all_constant_kinds() {
        let chunk = compile_src(r#"let a = 1 let b = "two" let c = true print(a)"#);
        let decoded = decode(&encode(&chunk)).unwrap();
        assert_eq!(decoded, chunk);
    }

    #[test]
    fn round_trip_nested_chunks() {
        let chunk = compile_src("let f = fn(a, b) => a + b print(f(2, 3))");
        let decoded = decode(&encode(&chunk)).unwrap();
        assert_eq!(decoded, chunk);
        let has_nested = decoded
            .constants
            .iter()
            .any(|c| matches!(c, Constant::Chunk(sub) if sub.params == ["a", "b"]));
        assert!(has_nested);
    }

    #[test]
    fn round_trip_empty_program() {
        let chunk = compile_src("");
        let decoded = decode(&encode(&chunk)).unwrap();
        assert_eq!(decoded, chunk);
    }

    #[test]
    fn bad_magic_is_rejected() {
        let err = decode(b"NOPE\x01").unwrap_err();
        assert!(matches!(err, Error::Decode(_)));
    }

    #[test]
    fn wrong_version_is_rejected() {
        let mut bytes = encode(&compile_src("1"));
        bytes[4] = 99;
        let err = decode(&bytes).unwrap_err();
        match err {
            Error::Decode(msg) => assert!(msg.contains("version"), "message: {msg}"),
            other => panic!("expected decode error, got {other:?}"),
        }
    }

    #[test]
    fn truncated_input_is_rejected() {
        let bytes = encode(&compile_src("let x = 1"));
        for cut in [3, 5, 8, bytes.len() - 1] {
            assert!(
                matches!(decode(&bytes[..cut]), Err(Error::Decode(_))),
                "cut at {cut} should fail"
            );
        }
    }

    #[test]
    fn trailing_garbage_is_rejected() {
        let mut bytes = encode(&compile_src("1"));
        bytes.push(0);
        assert!(matches!(decode(&bytes), Err(Error::Decode(_))));
    }

    #[test]
    fn unknown_constant_tag_is_rejected() {
        let chunk = compile_src("let x = 1");
        let clean = encode(&chunk);
        // The first constant tag sits right after the header and code block.
        let tag_pos = 4 + 1 + 4 + chunk.code.len() + 4;
        let mut bytes = clean;
        bytes[tag_pos] = 9;
        assert!(matches!(decode(&bytes), Err(Error::Decode(_))));
    }
}
