use crate::*;
use rand::Rng;
use std::any::Any;
use std::f64::consts::PI;

// ============================================================================
//  SCALARS
// ============================================================================

#[test]
fn test_bool_is_one_byte() -> Result<()> {
    let mut w = Writer::new();
    w.bool(true).bool(false);
    let bytes = w.into_bytes();
    assert_eq!(bytes, vec![1, 0]);

    let mut r = Reader::new(&bytes);
    assert!(r.bool()?);
    assert!(!r.bool()?);
    r.finish()
}

#[test]
fn test_invalid_bool_byte() {
    let mut r = Reader::new(&[2]);
    assert_eq!(r.bool(), Err(Error::InvalidBool(2)));
}

#[test]
fn test_integers_are_little_endian() {
    let mut w = Writer::new();
    w.u16(0x0102).u32(0x03040506).i64(-2);
    assert_eq!(
        w.as_bytes(),
        &[0x02, 0x01, 0x06, 0x05, 0x04, 0x03, 0xFE, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF]
    );
}

#[test]
fn test_integer_extremes_roundtrip() -> Result<()> {
    let mut w = Writer::new();
    w.u8(u8::MAX).i8(i8::MIN).u16(u16::MAX).i16(i16::MIN);
    w.u32(u32::MAX).i32(i32::MIN).u64(u64::MAX).i64(i64::MIN);

    let bytes = w.into_bytes();
    let mut r = Reader::new(&bytes);
    assert_eq!(r.u8()?, u8::MAX);
    assert_eq!(r.i8()?, i8::MIN);
    assert_eq!(r.u16()?, u16::MAX);
    assert_eq!(r.i16()?, i16::MIN);
    assert_eq!(r.u32()?, u32::MAX);
    assert_eq!(r.i32()?, i32::MIN);
    assert_eq!(r.u64()?, u64::MAX);
    assert_eq!(r.i64()?, i64::MIN);
    r.finish()
}

#[test]
fn test_floats_roundtrip() -> Result<()> {
    let mut w = Writer::new();
    w.f32(3.14159).f64(PI).f64(f64::NEG_INFINITY);

    let bytes = w.into_bytes();
    let mut r = Reader::new(&bytes);
    assert_eq!(r.f32()?, 3.14159);
    assert_eq!(r.f64()?, PI);
    assert_eq!(r.f64()?, f64::NEG_INFINITY);
    r.finish()
}

#[test]
fn test_random_primitives_roundtrip() -> Result<()> {
    let mut rng = rand::thread_rng();
    for _ in 0..200 {
        let a: u8 = rng.r#gen();
        let b: i16 = rng.r#gen();
        let c: u32 = rng.r#gen();
        let d: i64 = rng.r#gen();
        let e: f32 = rng.r#gen();
        let f: f64 = rng.r#gen();
        let g: bool = rng.r#gen();

        let mut w = Writer::new();
        w.pack(&(a, b, c, d, e, f))?.pack(&g)?;
        let bytes = w.into_bytes();

        let mut r = Reader::new(&bytes);
        let decoded: (u8, i16, u32, i64, f32, f64) = r.unpack()?;
        assert_eq!(decoded, (a, b, c, d, e, f));
        assert_eq!(r.unpack::<bool>()?, g);
        r.finish()?;
    }
    Ok(())
}

// ============================================================================
//  BLOBS
// ============================================================================

#[test]
fn test_strings_and_blobs() -> Result<()> {
    let mut w = Writer::new();
    w.str("hello")?.str("")?.str("🦀 crab")?.bytes(&[0xDE, 0xAD])?;

    let bytes = w.into_bytes();
    let mut r = Reader::new(&bytes);
    assert_eq!(r.str()?, "hello");
    assert_eq!(r.str()?, "");
    assert_eq!(r.str()?, "🦀 crab");
    assert_eq!(r.bytes()?, &[0xDE, 0xAD]);
    r.finish()
}

#[test]
fn test_invalid_utf8() {
    let mut w = Writer::new();
    w.bytes(&[0xFF, 0xFE]).unwrap();
    let bytes = w.into_bytes();
    let mut r = Reader::new(&bytes);
    assert_eq!(r.str(), Err(Error::InvalidUtf8));
}

#[test]
fn test_option_and_list() -> Result<()> {
    let mut w = Writer::new();
    w.pack(&Some(7u32))?.pack(&None::<u32>)?;
    pack_list(&mut w, &["a".to_string(), "bc".to_string()])?;

    let bytes = w.into_bytes();
    let mut r = Reader::new(&bytes);
    assert_eq!(r.unpack::<Option<u32>>()?, Some(7));
    assert_eq!(r.unpack::<Option<u32>>()?, None);
    assert_eq!(unpack_list::<String>(&mut r)?, vec!["a", "bc"]);
    r.finish()
}

// ============================================================================
//  STRICTNESS
// ============================================================================

#[test]
fn test_over_read_is_an_error() {
    let mut r = Reader::new(&[1, 2, 3]);
    assert_eq!(r.u32(), Err(Error::UnexpectedEnd { needed: 4, remaining: 3 }));
    // Failed reads do not move the cursor.
    assert_eq!(r.position(), 0);
    assert_eq!(r.u16().unwrap(), 0x0201);
    assert_eq!(r.position(), 2);
}

#[test]
fn test_truncated_string() {
    let mut w = Writer::new();
    w.str("truncated").unwrap();
    let bytes = w.into_bytes();
    let mut r = Reader::new(&bytes[..6]);
    assert!(matches!(r.str(), Err(Error::UnexpectedEnd { .. })));
}

#[test]
fn test_trailing_bytes_detected() {
    let mut r = Reader::new(&[0, 0, 0, 0, 9]);
    r.u32().unwrap();
    assert_eq!(r.finish(), Err(Error::TrailingBytes(1)));
}

#[test]
fn test_corrupt_list_count() {
    let mut w = Writer::new();
    w.u32(u32::MAX);
    let bytes = w.into_bytes();
    let mut r = Reader::new(&bytes);
    assert!(unpack_list::<u64>(&mut r).is_err());
}

// ============================================================================
//  TAGGED OBJECTS
// ============================================================================

#[derive(Debug, PartialEq)]
struct Position {
    x: f32,
    y: f32,
}

#[derive(Debug, PartialEq)]
struct Chat {
    from: String,
    text: String,
}

impl WireObject for Position {
    fn wire_type(&self) -> u16 { 10 }
    fn pack_object(&self, w: &mut Writer) -> Result<()> {
        w.f32(self.x).f32(self.y);
        Ok(())
    }
    fn as_any(&self) -> &dyn Any { self }
}

impl Unpack for Position {
    fn unpack(r: &mut Reader<'_>) -> Result<Self> {
        Ok(Position { x: r.f32()?, y: r.f32()? })
    }
}

impl WireObject for Chat {
    fn wire_type(&self) -> u16 { 11 }
    fn pack_object(&self, w: &mut Writer) -> Result<()> {
        w.str(&self.from)?.str(&self.text)?;
        Ok(())
    }
    fn as_any(&self) -> &dyn Any { self }
}

impl Unpack for Chat {
    fn unpack(r: &mut Reader<'_>) -> Result<Self> {
        Ok(Chat { from: r.unpack()?, text: r.unpack()? })
    }
}

fn registry() -> ObjectRegistry {
    let mut reg = ObjectRegistry::new();
    reg.register::<Position>(10).unwrap();
    reg.register::<Chat>(11).unwrap();
    reg
}

#[test]
fn test_tagged_objects_rebuild_polymorphically() -> Result<()> {
    let reg = registry();
    let objects: Vec<Box<dyn WireObject>> = vec![
        Box::new(Chat { from: "ann".into(), text: "hi".into() }),
        Box::new(Position { x: 1.5, y: -2.0 }),
    ];

    let mut w = Writer::new();
    for obj in &objects {
        w.tagged(obj.as_ref())?;
    }
    let bytes = w.into_bytes();

    let mut r = Reader::new(&bytes);
    let first = r.tagged(&reg)?;
    let second = r.tagged(&reg)?;
    r.finish()?;

    assert_eq!(
        first.downcast_ref::<Chat>(),
        Some(&Chat { from: "ann".into(), text: "hi".into() })
    );
    assert_eq!(second.downcast_ref::<Position>(), Some(&Position { x: 1.5, y: -2.0 }));
    assert!(second.downcast_ref::<Chat>().is_none());
    Ok(())
}

#[test]
fn test_unknown_tag() {
    let reg = registry();
    let mut w = Writer::new();
    w.u16(99);
    let bytes = w.into_bytes();
    let mut r = Reader::new(&bytes);
    assert_eq!(r.tagged(&reg).unwrap_err(), Error::UnknownTag(99));
}

#[test]
fn test_duplicate_tag_rejected() {
    let mut reg = registry();
    assert_eq!(reg.register::<Chat>(10), Err(Error::DuplicateTag(10)));
    assert_eq!(reg.type_name(10), Some(std::any::type_name::<Position>()));
}

#[test]
fn test_registering_under_foreign_tag_fails_on_decode() {
    let mut reg = ObjectRegistry::new();
    reg.register::<Position>(12).unwrap();

    let mut w = Writer::new();
    w.u16(12).f32(1.0).f32(2.0);
    let bytes = w.into_bytes();
    let mut r = Reader::new(&bytes);
    assert_eq!(r.tagged(&reg).unwrap_err(), Error::TagMismatch { tag: 12, wire_type: 10 });
}
