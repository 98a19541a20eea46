use wirepack::Reader;
use wirepack::Writer;

use super::*;

struct Avatar;

impl DistributedObject for Avatar {
    fn object_id(&self) -> u64 {
        1
    }
}

impl DistributedContract for Avatar {
    const NAME: &'static str = "Avatar";
    const TYPE_ID: u16 = 10;

    fn describe(b: &mut DefinitionBuilder) {
        b.property("Name", ValueKind::Str).method("Hello", &[], None);
    }
}

struct Chest;

impl DistributedObject for Chest {
    fn object_id(&self) -> u64 {
        2
    }
}

impl DistributedContract for Chest {
    const NAME: &'static str = "Chest";
    const TYPE_ID: u16 = 11;

    fn describe(b: &mut DefinitionBuilder) {
        b.property_with_id(1, "Locked", ValueKind::Bool)
            .property_with_id(2, "Owner", ValueKind::Object(10))
            .method_with_id(3, "Open", &[ValueKind::Object(10)], Some(ValueKind::Bool))
            .method_with_id(4, "Store", &[ValueKind::U64, ValueKind::Bytes], None);
    }
}

struct Clash;

impl DistributedObject for Clash {
    fn object_id(&self) -> u64 {
        3
    }
}

impl DistributedContract for Clash {
    const NAME: &'static str = "Clash";
    const TYPE_ID: u16 = 11;

    fn describe(b: &mut DefinitionBuilder) {
        b.method_with_id(1, "Noop", &[], None);
    }
}

fn auto() -> RepositoryOptions {
    RepositoryOptions::default().allow_auto_ids()
}

// --- Id assignment ---

#[test]
fn test_property_then_method_gets_201_and_102() {
    let repo = Repository::initialize([CatalogEntry::of::<Avatar>()], &auto()).unwrap();
    let avatar = repo.definition::<Avatar>().unwrap();

    assert_eq!(avatar.property_id("Name"), Some(201));
    assert_eq!(avatar.method_id("Hello"), Some(102));
}

#[test]
fn test_auto_ids_are_reproducible() {
    let first = Repository::initialize([CatalogEntry::of::<Avatar>()], &auto()).unwrap();
    let second = Repository::initialize([CatalogEntry::of::<Avatar>()], &auto()).unwrap();

    let a = first.definition::<Avatar>().unwrap();
    let b = second.definition::<Avatar>().unwrap();
    assert_eq!(a.methods(), b.methods());
    assert_eq!(a.properties(), b.properties());
}

#[test]
fn test_counter_is_shared_and_counts_explicit_members() {
    fn describe(b: &mut DefinitionBuilder) {
        b.property_with_id(7, "Fixed", ValueKind::I32)
            .property("Loose", ValueKind::I32)
            .method("Ping", &[], None)
            .method_with_id(9, "Pong", &[], None)
            .method("Pang", &[], None);
    }
    let repo = Repository::initialize([CatalogEntry::from_table("Mixed", 20, true, describe)], &auto()).unwrap();
    let mixed = repo.definition_by_name("Mixed").unwrap();

    assert_eq!(mixed.property_id("Fixed"), Some(7));
    assert_eq!(mixed.property_id("Loose"), Some(202));
    assert_eq!(mixed.method_id("Ping"), Some(103));
    assert_eq!(mixed.method_id("Pong"), Some(9));
    assert_eq!(mixed.method_id("Pang"), Some(105));
}

#[test]
fn test_accessors_are_skipped() {
    fn describe(b: &mut DefinitionBuilder) {
        b.property_with_id(1, "Health", ValueKind::I32)
            .method_with_id(2, "get_Health", &[], Some(ValueKind::I32))
            .method_with_id(3, "set_Health", &[ValueKind::I32], None)
            .method_with_id(4, "Heal", &[ValueKind::I32], None);
    }
    let repo = Repository::initialize([CatalogEntry::from_table("Mob", 21, true, describe)], &Default::default())
        .unwrap();
    let mob = repo.definition_by_type_id(21).unwrap();

    let names: Vec<&str> = mob.methods().iter().map(|m| m.name()).collect();
    assert_eq!(names, vec!["Heal"]);
    assert_eq!(mob.method_id("get_Health"), None);
}

#[test]
fn test_explicit_ids_are_mandatory_by_default() {
    let err = Repository::initialize([CatalogEntry::of::<Avatar>()], &RepositoryOptions::default()).unwrap_err();
    assert_eq!(err, Error::ImplicitId { contract: "Avatar", member: "Name".into() });
}

#[test]
fn test_auto_id_overflow_is_rejected() {
    fn describe(b: &mut DefinitionBuilder) {
        for i in 0..65336u32 {
            b.property_with_id(i as u16, &format!("P{}", i), ValueKind::Bool);
        }
        b.property("TooMany", ValueKind::Bool);
    }
    let err = Repository::initialize([CatalogEntry::from_table("Huge", 30, true, describe)], &auto()).unwrap_err();
    assert_eq!(err, Error::IdOverflow { contract: "Huge", member: "TooMany".into() });
}

// --- Validation ---

#[test]
fn test_missing_base_capability_is_fatal() {
    fn describe(_: &mut DefinitionBuilder) {}
    let catalog = [CatalogEntry::of::<Chest>(), CatalogEntry::from_table("Ghost", 40, false, describe)];

    let err = Repository::initialize(catalog, &RepositoryOptions::default()).unwrap_err();
    assert_eq!(err, Error::MissingBaseCapability { contract: "Ghost" });
}

#[test]
fn test_duplicate_type_id_is_fatal() {
    let catalog = [CatalogEntry::of::<Chest>(), CatalogEntry::of::<Clash>()];

    let err = Repository::initialize(catalog, &RepositoryOptions::default()).unwrap_err();
    assert_eq!(err, Error::DuplicateTypeId { type_id: 11, first: "Chest", second: "Clash" });
}

#[test]
fn test_duplicate_contract_name_is_fatal() {
    fn describe(_: &mut DefinitionBuilder) {}
    let catalog = [CatalogEntry::of::<Chest>(), CatalogEntry::from_table("Chest", 99, true, describe)];

    let err = Repository::initialize(catalog, &RepositoryOptions::default()).unwrap_err();
    assert_eq!(err, Error::DuplicateContractName("Chest"));
}

#[test]
fn test_duplicate_member_id_across_kinds_is_fatal() {
    fn describe(b: &mut DefinitionBuilder) {
        b.property_with_id(5, "Speed", ValueKind::F32).method_with_id(5, "Stop", &[], None);
    }
    let err = Repository::initialize([CatalogEntry::from_table("Cart", 50, true, describe)], &Default::default())
        .unwrap_err();
    assert_eq!(err, Error::DuplicateMemberId { contract: "Cart", id: 5 });
}

#[test]
fn test_duplicate_member_name_is_fatal() {
    fn describe(b: &mut DefinitionBuilder) {
        b.method_with_id(1, "Go", &[], None).method_with_id(2, "Go", &[ValueKind::U32], None);
    }
    let err = Repository::initialize([CatalogEntry::from_table("Cart", 50, true, describe)], &Default::default())
        .unwrap_err();
    assert_eq!(err, Error::DuplicateMemberName { contract: "Cart", name: "Go".into() });
}

// --- Lookups ---

#[test]
fn test_lookups_agree() {
    let catalog = [CatalogEntry::of::<Avatar>(), CatalogEntry::of::<Chest>()];
    let repo = Repository::initialize(catalog, &auto()).unwrap();
    assert_eq!(repo.len(), 2);

    let by_type = repo.definition::<Chest>().unwrap();
    let by_id = repo.definition_by_type_id(11).unwrap();
    let by_name = repo.definition_by_name("Chest").unwrap();
    assert!(std::ptr::eq(by_type, by_id));
    assert!(std::ptr::eq(by_id, by_name));

    let open = by_type.method(3).unwrap();
    assert_eq!(open.name(), "Open");
    assert_eq!(open.params(), &[ValueKind::Object(10)]);
    assert_eq!(open.returns(), Some(ValueKind::Bool));
    assert_eq!(by_type.property(2).unwrap().kind(), ValueKind::Object(10));
    assert_eq!(by_type.property_id("Locked"), Some(1));

    assert!(by_type.method(1).is_none());
    assert!(by_type.property(3).is_none());
    assert!(repo.definition_by_type_id(12).is_none());
    assert!(repo.definition_by_name("Door").is_none());
}

#[test]
fn test_table_entries_have_no_rust_type_lookup() {
    fn describe(b: &mut DefinitionBuilder) {
        b.method_with_id(1, "Noop", &[], None);
    }
    let repo = Repository::initialize([CatalogEntry::from_table("Clash", 11, true, describe)], &Default::default())
        .unwrap();
    assert!(repo.definition::<Clash>().is_none());
    assert!(repo.definition_by_type_id(11).is_some());
}

#[test]
fn test_empty_catalog() {
    let repo = Repository::initialize(Vec::<CatalogEntry>::new(), &RepositoryOptions::default()).unwrap();
    assert!(repo.is_empty());
    assert_eq!(repo.iter().count(), 0);
}

// --- Wire references ---

#[test]
fn test_encode_call_writes_numbers_only() {
    let repo = Repository::initialize([CatalogEntry::of::<Chest>()], &RepositoryOptions::default()).unwrap();
    let chest = repo.definition::<Chest>().unwrap();

    let mut w = Writer::new();
    chest.encode_call(&mut w, 4).unwrap();
    assert_eq!(w.as_bytes(), &[11, 0, 4, 0]);

    let bytes = w.into_bytes();
    let mut r = Reader::new(&bytes);
    let (definition, member) = repo.decode_call(&mut r).unwrap();
    assert_eq!(definition.name(), "Chest");
    assert_eq!(member, MemberRef { type_id: 11, member_id: 4 });
    assert_eq!(definition.method(member.member_id).unwrap().name(), "Store");
}

#[test]
fn test_encode_call_rejects_unknown_member() {
    let repo = Repository::initialize([CatalogEntry::of::<Chest>()], &RepositoryOptions::default()).unwrap();
    let chest = repo.definition::<Chest>().unwrap();

    let mut w = Writer::new();
    let err = chest.encode_call(&mut w, 77).unwrap_err();
    assert_eq!(err, Error::UnknownMember { type_id: 11, member_id: 77 });
    assert!(w.is_empty());
}

#[test]
fn test_decode_call_rejects_unknown_type() {
    let repo = Repository::initialize([CatalogEntry::of::<Chest>()], &RepositoryOptions::default()).unwrap();
    let bytes = [12, 0, 1, 0];
    let err = repo.decode_call(&mut Reader::new(&bytes)).unwrap_err();
    assert_eq!(err, Error::UnknownType(12));
}

#[test]
fn test_member_ref_by_name() {
    let repo = Repository::initialize([CatalogEntry::of::<Chest>()], &RepositoryOptions::default()).unwrap();
    let chest = repo.definition::<Chest>().unwrap();

    assert_eq!(chest.member_ref("Locked"), Some(MemberRef { type_id: 11, member_id: 1 }));
    assert_eq!(chest.member_ref("Open"), Some(MemberRef { type_id: 11, member_id: 3 }));
    assert_eq!(chest.member_ref("Missing"), None);
}
