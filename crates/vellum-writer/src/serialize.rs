//! Canonical text serialization for every node kind.

use vellum_object::{Dictionary, Object, Stream, StringKind};

/// Serialize one object into `out`.
pub fn serialize_object(out: &mut Vec<u8>, object: &Object) {
    match object {
        Object::Null => out.extend_from_slice(b"null"),
        Object::Boolean(true) => out.extend_from_slice(b"true"),
        Object::Boolean(false) => out.extend_from_slice(b"false"),
        Object::Integer(v) => out.extend_from_slice(v.to_string().as_bytes()),
        Object::Real(v) => serialize_real(out, *v),
        Object::Literal(bytes) => out.extend_from_slice(bytes),
        Object::Name(n) => serialize_name(out, n.as_str()),
        Object::String(bytes, StringKind::Literal) => serialize_literal_string(out, bytes),
        Object::String(bytes, StringKind::Hex) => {
            out.push(b'<');
            out.extend_from_slice(hex::encode(bytes).as_bytes());
            out.push(b'>');
        }
        Object::Array(items) => {
            out.push(b'[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(b' ');
                }
                serialize_object(out, item);
            }
            out.push(b']');
        }
        Object::Dictionary(dict) => serialize_dict(out, dict),
        Object::Stream(stream) => serialize_stream(out, stream),
        Object::Reference(r) => out.extend_from_slice(r.to_string().as_bytes()),
    }
}

/// Serialize into a fresh buffer.
pub fn serialized(object: &Object) -> Vec<u8> {
    let mut out = Vec::new();
    serialize_object(&mut out, object);
    out
}

fn serialize_dict(out: &mut Vec<u8>, dict: &Dictionary) {
    out.extend_from_slice(b"<<");
    for (key, value) in dict.iter() {
        out.push(b' ');
        serialize_name(out, key.as_str());
        out.push(b' ');
        serialize_object(out, value);
    }
    out.extend_from_slice(b" >>");
}

fn serialize_stream(out: &mut Vec<u8>, stream: &Stream) {
    // The caller keeps /Length in sync with the body.
    serialize_dict(out, &stream.dict);
    out.extend_from_slice(b"\nstream\n");
    out.extend_from_slice(&stream.data);
    out.extend_from_slice(b"\nendstream");
}

/// Reals print with just enough fraction to round-trip, no exponent form.
fn serialize_real(out: &mut Vec<u8>, v: f64) {
    if v == v.trunc() && v.abs() < 1e15 {
        out.extend_from_slice(format!("{v:.1}").as_bytes());
    } else {
        let mut text = format!("{v}");
        if text.contains('e') || text.contains('E') {
            text = format!("{v:.10}");
            while text.ends_with('0') {
                text.pop();
            }
            if text.ends_with('.') {
                text.push('0');
            }
        }
        out.extend_from_slice(text.as_bytes());
    }
}

fn serialize_name(out: &mut Vec<u8>, name: &str) {
    out.push(b'/');
    for &b in name.as_bytes() {
        let delimiter = matches!(
            b,
            b'(' | b')' | b'<' | b'>' | b'[' | b']' | b'{' | b'}' | b'/' | b'%' | b'#'
        );
        if b <= b' ' || b > b'~' || delimiter {
            out.extend_from_slice(format!("#{b:02X}").as_bytes());
        } else {
            out.push(b);
        }
    }
}

fn serialize_literal_string(out: &mut Vec<u8>, bytes: &[u8]) {
    out.push(b'(');
    for &b in bytes {
        match b {
            b'(' | b')' | b'\\' => {
                out.push(b'\\');
                out.push(b);
            }
            b'\n' => out.extend_from_slice(b"\\n"),
            b'\r' => out.extend_from_slice(b"\\r"),
            b'\t' => out.extend_from_slice(b"\\t"),
            b if b < 0x20 || b >= 0x7f => {
                out.extend_from_slice(format!("\\{b:03o}").as_bytes());
            }
            b => out.push(b),
        }
    }
    out.push(b')');
}
