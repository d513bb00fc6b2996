//! Portable binary form of a [`CodeObject`] tree.
//!
//! All integers are little-endian. Every code object, nested ones included,
//! starts with its own magic and version:
//!
//! ```text
//! magic        4 bytes  "QBC\x01"
//! version      u16
//! code         u32 count, u32 words
//! max_stack    u32
//! constants    u32 count, per constant: tag u8, u32 len, postcard payload
//! flags        u32
//! args         u32
//! outers       u32
//! locals       u32
//! arg names    per argument: u32 len (0 = unnamed), utf-8 bytes
//! debug table  only with HAS_DEBUG_INFO: u32 count,
//!              per entry: u32 len, utf-8 bytes, u32 start, u32 end
//! children     u32 count, each a full code object
//! ```
//!
//! The HAS_DEBUG_INFO bit is written from the presence of a debug table,
//! not copied from `flags`. Readers reject trees nested deeper than
//! [`MAX_NESTING`].

use std::io::{self, Read, Write};

use thiserror::Error;
use tracing::debug;

use crate::bytecode::ir::{CodeFlags, CodeObject, DebugSymbol, DebugTable};
use crate::bytecode::op::Instruction;
use crate::lang::value::Value;

pub const MAGIC: [u8; 4] = *b"QBC\x01";
pub const VERSION: u16 = 1;

/// Upper bound for speculative allocation while reading counts.
const PREALLOC_LIMIT: usize = 4096;

/// Deepest child nesting accepted by the reader; the root is depth 0.
pub const MAX_NESTING: usize = 256;

#[derive(Debug, Error)]
pub enum SerializeError {
    #[error("bytecode i/o error: {0}")]
    Io(#[from] io::Error),

    #[error("not a bytecode file: bad magic {0:02x?}")]
    BadMagic([u8; 4]),

    #[error("unsupported bytecode version {found} (expected {})", VERSION)]
    UnsupportedVersion { found: u16 },

    #[error("constant {index}: {reason}")]
    Constant { index: u32, reason: String },

    #[error("constant {index}: tag {tag} does not match decoded {kind}")]
    ConstantTagMismatch {
        index: u32,
        tag: u8,
        kind: &'static str,
    },

    #[error("{what} is not valid utf-8")]
    InvalidUtf8 { what: &'static str },

    #[error("{what} length {len} does not fit the format")]
    TooLarge { what: &'static str, len: usize },

    #[error("{0} unexpected byte(s) after the code object")]
    TrailingBytes(usize),

    #[error("code objects nested deeper than {limit}")]
    TooDeep { limit: usize },
}

impl CodeObject {
    /// Write this code object and all its children.
    pub fn write_to<W: Write>(&self, w: &mut W) -> Result<(), SerializeError> {
        write_code(w, self)
    }

    /// Read one code object (with children) from `r`.
    pub fn read_from<R: Read>(r: &mut R) -> Result<CodeObject, SerializeError> {
        read_code(r, 0)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, SerializeError> {
        let mut out = Vec::new();
        self.write_to(&mut out)?;
        debug!(bytes = out.len(), code_objects = self.tree_size(), "bytecode written");
        Ok(out)
    }

    /// Decode a buffer holding exactly one code object.
    pub fn from_bytes(bytes: &[u8]) -> Result<CodeObject, SerializeError> {
        let mut cursor = bytes;
        let code = read_code(&mut cursor, 0)?;
        if !cursor.is_empty() {
            return Err(SerializeError::TrailingBytes(cursor.len()));
        }
        Ok(code)
    }
}

// =============================================================================
// Writing
// =============================================================================

fn len_u32(what: &'static str, len: usize) -> Result<u32, SerializeError> {
    u32::try_from(len).map_err(|_| SerializeError::TooLarge { what, len })
}

fn write_u32<W: Write>(w: &mut W, v: u32) -> Result<(), SerializeError> {
    w.write_all(&v.to_le_bytes())?;
    Ok(())
}

fn write_str<W: Write>(w: &mut W, what: &'static str, s: &str) -> Result<(), SerializeError> {
    write_u32(w, len_u32(what, s.len())?)?;
    w.write_all(s.as_bytes())?;
    Ok(())
}

fn write_constant<W: Write>(w: &mut W, index: u32, value: &Value) -> Result<(), SerializeError> {
    let payload = postcard::to_allocvec(value).map_err(|e| SerializeError::Constant {
        index,
        reason: e.to_string(),
    })?;
    w.write_all(&[value.kind_tag()])?;
    write_u32(w, len_u32("constant payload", payload.len())?)?;
    w.write_all(&payload)?;
    Ok(())
}

fn write_code<W: Write>(w: &mut W, code: &CodeObject) -> Result<(), SerializeError> {
    w.write_all(&MAGIC)?;
    w.write_all(&VERSION.to_le_bytes())?;

    write_u32(w, len_u32("instruction array", code.code.len())?)?;
    for ins in &code.code {
        write_u32(w, ins.raw())?;
    }

    write_u32(w, code.max_stack)?;

    write_u32(w, len_u32("constant pool", code.constants.len())?)?;
    for (i, value) in code.constants.iter().enumerate() {
        write_constant(w, i as u32, value)?;
    }

    let mut flags = code.flags;
    match code.debug {
        Some(_) => flags.insert(CodeFlags::HAS_DEBUG_INFO),
        None => flags.remove(CodeFlags::HAS_DEBUG_INFO),
    }
    write_u32(w, flags.bits())?;
    write_u32(w, code.arg_count)?;
    write_u32(w, code.outer_count)?;
    write_u32(w, code.local_count)?;

    for i in 0..code.arg_count as usize {
        match code.arg_names.get(i).and_then(Option::as_deref) {
            Some(name) => write_str(w, "argument name", name)?,
            None => write_u32(w, 0)?,
        }
    }

    if let Some(debug) = &code.debug {
        write_u32(w, len_u32("debug table", debug.symbols.len())?)?;
        for sym in &debug.symbols {
            write_str(w, "debug symbol", &sym.name)?;
            write_u32(w, sym.start)?;
            write_u32(w, sym.end)?;
        }
    }

    write_u32(w, len_u32("child list", code.children.len())?)?;
    for child in &code.children {
        write_code(w, child)?;
    }
    Ok(())
}

// =============================================================================
// Reading
// =============================================================================

fn read_u32<R: Read>(r: &mut R) -> Result<u32, SerializeError> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

fn read_bytes<R: Read>(r: &mut R, len: u32) -> Result<Vec<u8>, SerializeError> {
    let mut buf = Vec::with_capacity((len as usize).min(PREALLOC_LIMIT));
    r.by_ref().take(len as u64).read_to_end(&mut buf)?;
    if buf.len() != len as usize {
        return Err(io::Error::from(io::ErrorKind::UnexpectedEof).into());
    }
    Ok(buf)
}

fn read_string<R: Read>(r: &mut R, what: &'static str, len: u32) -> Result<String, SerializeError> {
    String::from_utf8(read_bytes(r, len)?).map_err(|_| SerializeError::InvalidUtf8 { what })
}

fn read_constant<R: Read>(r: &mut R, index: u32) -> Result<Value, SerializeError> {
    let mut tag = [0u8; 1];
    r.read_exact(&mut tag)?;
    let len = read_u32(r)?;
    let payload = read_bytes(r, len)?;

    let value: Value = postcard::from_bytes(&payload).map_err(|e| SerializeError::Constant {
        index,
        reason: e.to_string(),
    })?;
    if value.kind_tag() != tag[0] {
        return Err(SerializeError::ConstantTagMismatch {
            index,
            tag: tag[0],
            kind: value.kind_name(),
        });
    }
    Ok(value)
}

fn read_code<R: Read>(r: &mut R, depth: usize) -> Result<CodeObject, SerializeError> {
    if depth > MAX_NESTING {
        return Err(SerializeError::TooDeep { limit: MAX_NESTING });
    }
    let mut magic = [0u8; 4];
    r.read_exact(&mut magic)?;
    if magic != MAGIC {
        return Err(SerializeError::BadMagic(magic));
    }
    let mut version = [0u8; 2];
    r.read_exact(&mut version)?;
    let version = u16::from_le_bytes(version);
    if version != VERSION {
        return Err(SerializeError::UnsupportedVersion { found: version });
    }

    let count = read_u32(r)? as usize;
    let mut code = Vec::with_capacity(count.min(PREALLOC_LIMIT));
    for _ in 0..count {
        code.push(Instruction::from_raw(read_u32(r)?));
    }

    let max_stack = read_u32(r)?;

    let count = read_u32(r)?;
    let mut constants = Vec::with_capacity((count as usize).min(PREALLOC_LIMIT));
    for index in 0..count {
        constants.push(read_constant(r, index)?);
    }

    let flags = CodeFlags::from_bits(read_u32(r)?);
    let arg_count = read_u32(r)?;
    let outer_count = read_u32(r)?;
    let local_count = read_u32(r)?;

    let mut arg_names = Vec::with_capacity((arg_count as usize).min(PREALLOC_LIMIT));
    for _ in 0..arg_count {
        let len = read_u32(r)?;
        arg_names.push(match len {
            0 => None,
            len => Some(read_string(r, "argument name", len)?),
        });
    }

    let debug = if flags.contains(CodeFlags::HAS_DEBUG_INFO) {
        let count = read_u32(r)?;
        let mut symbols = Vec::with_capacity((count as usize).min(PREALLOC_LIMIT));
        for _ in 0..count {
            let len = read_u32(r)?;
            let name = read_string(r, "debug symbol", len)?;
            let start = read_u32(r)?;
            let end = read_u32(r)?;
            symbols.push(DebugSymbol { name, start, end });
        }
        Some(DebugTable { symbols })
    } else {
        None
    };

    let count = read_u32(r)?;
    let mut children = Vec::with_capacity((count as usize).min(PREALLOC_LIMIT));
    for _ in 0..count {
        children.push(read_code(r, depth + 1)?);
    }

    Ok(CodeObject {
        code,
        constants,
        max_stack,
        flags,
        arg_count,
        outer_count,
        local_count,
        arg_names,
        debug,
        children,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::compile::Compiler;
    use crate::bytecode::op::Opcode;
    use crate::config::CompilerConfig;
    use crate::lang::build::*;
    use crate::lang::node::BinaryOp;
    use proptest::prelude::*;

    fn sample_program() -> CodeObject {
        let body = vec![
            if_stmt(
                binary(BinaryOp::LtEq, ident("n"), int(1)),
                ret(ident("acc")),
                None,
            ),
            ret(call(
                ident("f"),
                vec![
                    binary(BinaryOp::Sub, ident("n"), int(1)),
                    binary(BinaryOp::Mul, ident("acc"), ident("n")),
                ],
            )),
        ];
        let program = vec![
            var("greeting", string("hello")),
            var("f", func_expr(&["n", "acc"], body)),
            try_stmt(
                vec![expr_stmt(call(ident("f"), vec![int(5), int(1)]))],
                Some(("e", vec![])),
                Some(vec![]),
            ),
        ];
        Compiler::new(CompilerConfig::debug())
            .compile_program(&lines(program, 1))
            .unwrap()
    }

    #[test]
    fn test_compiled_program_round_trips() {
        let original = sample_program();
        let bytes = original.to_bytes().unwrap();
        let decoded = CodeObject::from_bytes(&bytes).unwrap();

        assert_eq!(decoded, original);
        assert_eq!(decoded.children[0].count_op(Opcode::TailCall), 1);
        assert!(decoded.debug.is_some());
    }

    #[test]
    fn test_header_layout() {
        let bytes = CodeObject::new().to_bytes().unwrap();
        assert_eq!(&bytes[..4], b"QBC\x01");
        assert_eq!(&bytes[4..6], &[1, 0]);
        // code, max_stack, constants, flags, args, outers, locals, children
        assert_eq!(bytes.len(), 6 + 8 * 4);
    }

    #[test]
    fn test_unnamed_arguments_use_zero_length() {
        let code = CodeObject {
            arg_count: 2,
            arg_names: vec![Some("a".into()), None],
            ..CodeObject::new()
        };
        let decoded = CodeObject::from_bytes(&code.to_bytes().unwrap()).unwrap();
        assert_eq!(decoded.arg_names, vec![Some("a".into()), None]);
    }

    #[test]
    fn test_bad_magic() {
        let mut bytes = CodeObject::new().to_bytes().unwrap();
        bytes[0] = b'X';
        let err = CodeObject::from_bytes(&bytes).unwrap_err();
        assert!(matches!(err, SerializeError::BadMagic(_)));
    }

    #[test]
    fn test_unsupported_version() {
        let mut bytes = CodeObject::new().to_bytes().unwrap();
        bytes[4] = 2;
        let err = CodeObject::from_bytes(&bytes).unwrap_err();
        assert!(matches!(err, SerializeError::UnsupportedVersion { found: 2 }));
        assert!(err.to_string().contains("expected 1"));
    }

    #[test]
    fn test_truncated_stream_fails() {
        let bytes = sample_program().to_bytes().unwrap();
        for cut in [3, 10, bytes.len() / 2, bytes.len() - 1] {
            let err = CodeObject::from_bytes(&bytes[..cut]).unwrap_err();
            assert!(matches!(err, SerializeError::Io(_)), "cut at {}", cut);
        }
    }

    #[test]
    fn test_trailing_bytes_rejected() {
        let mut bytes = CodeObject::new().to_bytes().unwrap();
        bytes.push(0);
        let err = CodeObject::from_bytes(&bytes).unwrap_err();
        assert!(matches!(err, SerializeError::TrailingBytes(1)));
    }

    fn nested(depth: usize) -> CodeObject {
        let mut code = CodeObject::new();
        for _ in 0..depth {
            code = CodeObject {
                children: vec![code],
                ..CodeObject::new()
            };
        }
        code
    }

    #[test]
    fn test_nesting_limit() {
        let deepest = nested(MAX_NESTING);
        let decoded = CodeObject::from_bytes(&deepest.to_bytes().unwrap()).unwrap();
        assert_eq!(decoded.tree_size(), MAX_NESTING + 1);

        let bytes = nested(MAX_NESTING + 1).to_bytes().unwrap();
        let err = CodeObject::from_bytes(&bytes).unwrap_err();
        assert!(matches!(err, SerializeError::TooDeep { limit: MAX_NESTING }));
    }

    #[test]
    fn test_debug_flag_follows_debug_table() {
        let mut flags = CodeFlags::HAS_VARARGS;
        flags.insert(CodeFlags::HAS_DEBUG_INFO);
        let flag_without_table = CodeObject {
            flags,
            ..CodeObject::new()
        };
        let decoded = CodeObject::from_bytes(&flag_without_table.to_bytes().unwrap()).unwrap();
        assert!(decoded.debug.is_none());
        assert!(!decoded.has(CodeFlags::HAS_DEBUG_INFO));
        assert!(decoded.has(CodeFlags::HAS_VARARGS));

        let table_without_flag = CodeObject {
            debug: Some(DebugTable {
                symbols: vec![DebugSymbol {
                    name: "x".into(),
                    start: 0,
                    end: 2,
                }],
            }),
            ..CodeObject::new()
        };
        let decoded = CodeObject::from_bytes(&table_without_flag.to_bytes().unwrap()).unwrap();
        assert!(decoded.has(CodeFlags::HAS_DEBUG_INFO));
        assert_eq!(decoded.debug, table_without_flag.debug);
    }

    #[test]
    fn test_constant_tag_mismatch() {
        let code = CodeObject {
            constants: vec![Value::Integer(7)],
            ..CodeObject::new()
        };
        let mut bytes = code.to_bytes().unwrap();
        // header 6, code count 4, max_stack 4, constant count 4
        let tag_at = 6 + 4 + 4 + 4;
        assert_eq!(bytes[tag_at], Value::Integer(7).kind_tag());
        bytes[tag_at] = Value::Nil.kind_tag();

        let err = CodeObject::from_bytes(&bytes).unwrap_err();
        assert!(matches!(
            err,
            SerializeError::ConstantTagMismatch { index: 0, kind: "integer", .. }
        ));
    }

    #[test]
    fn test_invalid_utf8_name() {
        let code = CodeObject {
            arg_count: 1,
            arg_names: vec![Some("ab".into())],
            ..CodeObject::new()
        };
        let mut bytes = code.to_bytes().unwrap();
        // name bytes follow header, code, max_stack, constants, flags, args,
        // outers, locals and the name length
        let name_at = 6 + 4 * 8;
        assert_eq!(&bytes[name_at..name_at + 2], b"ab");
        bytes[name_at] = 0xff;

        let err = CodeObject::from_bytes(&bytes).unwrap_err();
        assert!(matches!(err, SerializeError::InvalidUtf8 { .. }));
    }

    #[test]
    fn test_write_to_and_read_from_stream() {
        let original = sample_program();
        let mut sink = Vec::new();
        original.write_to(&mut sink).unwrap();
        original.write_to(&mut sink).unwrap();

        let mut source = sink.as_slice();
        let first = CodeObject::read_from(&mut source).unwrap();
        let second = CodeObject::read_from(&mut source).unwrap();
        assert_eq!(first, original);
        assert_eq!(second, original);
        assert!(source.is_empty());
    }

    fn value_strategy() -> impl Strategy<Value = Value> {
        let leaf = prop_oneof![
            Just(Value::Nil),
            any::<bool>().prop_map(Value::Bool),
            any::<i64>().prop_map(Value::Integer),
            (-1.0e12f64..1.0e12).prop_map(Value::Real),
            "[a-z ]{0,12}".prop_map(Value::String),
        ];
        leaf.prop_recursive(2, 16, 4, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
                prop::collection::vec((inner.clone(), inner), 0..3).prop_map(Value::Map),
            ]
        })
    }

    proptest! {
        #[test]
        fn prop_round_trip(
            words in prop::collection::vec(any::<u32>(), 0..64),
            constants in prop::collection::vec(value_strategy(), 0..8),
            max_stack in any::<u32>(),
            local_count in 0u32..100,
        ) {
            let child = CodeObject {
                code: words.iter().rev().copied().map(Instruction::from_raw).collect(),
                ..CodeObject::new()
            };
            let original = CodeObject {
                code: words.into_iter().map(Instruction::from_raw).collect(),
                constants,
                max_stack,
                local_count,
                children: vec![child],
                ..CodeObject::new()
            };

            let decoded = CodeObject::from_bytes(&original.to_bytes().unwrap()).unwrap();
            prop_assert_eq!(decoded, original);
        }
    }
}
