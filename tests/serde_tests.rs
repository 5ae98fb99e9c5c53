use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use xmlrpc_serde::settings::{Config, FormatSettings};
use xmlrpc_serde::{
    Error, MultiArray, Record, SharedValue, Struct, StructSchema, TypeHint, Value, from_str,
    from_value, to_string, to_value,
};

fn compact() -> Config {
    Config::default().with_format(FormatSettings::compact())
}

fn sample_time() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2002, 8, 20)
        .and_then(|d| d.and_hms_opt(12, 34, 56))
        .unwrap()
}

#[derive(Debug, PartialEq, Serialize, Deserialize)]
struct Post {
    title: String,
    #[serde(rename = "postId")]
    post_id: i32,
    views: i64,
    rating: f64,
    published: bool,
    #[serde(with = "serde_bytes")]
    thumbnail: Vec<u8>,
    #[serde(with = "xmlrpc_serde::datetime")]
    created: NaiveDateTime,
    tags: Vec<String>,
    editor: Option<String>,
}

fn sample_post() -> Post {
    Post {
        title: "hello".into(),
        post_id: 12,
        views: 1 << 33,
        rating: 4.5,
        published: true,
        thumbnail: vec![0, 1, 2, 250],
        created: sample_time(),
        tags: vec!["rust".into(), "xml".into()],
        editor: None,
    }
}

#[test]
fn test_struct_to_value() {
    let value = to_value(&sample_post()).unwrap();
    let fields = value.as_struct().unwrap();
    assert_eq!(
        fields.keys().collect::<Vec<_>>(),
        [
            "title", "postId", "views", "rating", "published", "thumbnail", "created", "tags",
            "editor"
        ]
    );
    assert_eq!(fields.get("postId"), Some(&Value::Int(12)));
    assert_eq!(fields.get("views"), Some(&Value::Int64(1 << 33)));
    assert_eq!(fields.get("thumbnail"), Some(&Value::Base64(vec![0, 1, 2, 250])));
    assert_eq!(fields.get("created"), Some(&Value::DateTime(sample_time())));
    assert_eq!(fields.get("editor"), Some(&Value::Nil));
}

#[test]
fn test_struct_value_round_trip() {
    let post = sample_post();
    let decoded: Post = from_value(to_value(&post).unwrap()).unwrap();
    assert_eq!(decoded, post);
}

#[test]
fn test_struct_wire_round_trip() {
    let post = sample_post();
    let xml = to_string(&post, &compact()).unwrap();
    assert!(xml.contains("<member><name>postId</name><value><i4>12</i4></value></member>"), "{xml}");
    assert!(
        xml.contains("<dateTime.iso8601>20020820T12:34:56</dateTime.iso8601>"),
        "{xml}"
    );
    let decoded: Post = from_str(&xml, &compact()).unwrap();
    assert_eq!(decoded, post);
}

#[derive(Debug, PartialEq, Serialize, Deserialize)]
enum Shape {
    Empty,
    Circle(f64),
    Rect { w: i32, h: i32 },
    Line(i32, i32),
}

#[test]
fn test_enum_variants() {
    assert_eq!(to_value(&Shape::Empty).unwrap(), Value::from("Empty"));

    let circle = to_value(&Shape::Circle(1.5)).unwrap();
    assert_eq!(circle.as_struct().unwrap().get("Circle"), Some(&Value::Double(1.5)));

    for shape in [
        Shape::Empty,
        Shape::Circle(1.5),
        Shape::Rect { w: 2, h: 3 },
        Shape::Line(4, 5),
    ] {
        let xml = to_string(&shape, &compact()).unwrap();
        let decoded: Shape = from_str(&xml, &compact()).unwrap();
        assert_eq!(decoded, shape);
    }
}

#[test]
fn test_u64_out_of_range() {
    assert_eq!(to_value(&7u64).unwrap(), Value::Int64(7));
    assert!(matches!(to_value(&u64::MAX), Err(Error::UnsupportedType(_))));
}

#[test]
fn test_string_keyed_map() {
    let mut scores = BTreeMap::new();
    scores.insert("ann".to_string(), 3);
    scores.insert("bob".to_string(), 5);
    let xml = to_string(&scores, &compact()).unwrap();
    let decoded: BTreeMap<String, i32> = from_str(&xml, &compact()).unwrap();
    assert_eq!(decoded, scores);
}

#[test]
fn test_tuple_and_nested_seq() {
    let value = (1, "two".to_string(), vec![3.5, 4.5]);
    let decoded: (i32, String, Vec<f64>) = from_value(to_value(&value).unwrap()).unwrap();
    assert_eq!(decoded, value);
}

#[test]
fn test_multi_array_into_rows() {
    let arr = MultiArray::from_rows(vec![
        vec![1.into(), 2.into()],
        vec![3.into(), 4.into()],
        vec![5.into(), 6.into()],
    ])
    .unwrap();
    let rows: Vec<[i32; 2]> = from_value(Value::MultiArray(arr)).unwrap();
    assert_eq!(rows, [[1, 2], [3, 4], [5, 6]]);
}

#[derive(Debug, PartialEq, Deserialize)]
struct Point {
    x: i32,
    y: i32,
}

#[test]
fn test_record_into_struct() {
    let schema = StructSchema::builder("Point")
        .member("x", TypeHint::Int32)
        .member("y", TypeHint::Int32)
        .build();
    let record = Record::new(schema).with("x", 3).unwrap().with("y", -1).unwrap();
    let point: Point = from_value(Value::Record(record)).unwrap();
    assert_eq!(point, Point { x: 3, y: -1 });
}

#[test]
fn test_shared_values_detached() {
    let shared = SharedValue::new(7);
    let value = Value::Array(vec![shared.clone().into(), shared.into()]);
    let items: Vec<i32> = from_value(value).unwrap();
    assert_eq!(items, [7, 7]);

    let node = SharedValue::new(Value::Nil);
    let mut s = Struct::new();
    s.insert("next", node.clone());
    node.set(s);
    let err = from_value::<BTreeMap<String, i32>>(Value::Shared(node)).unwrap_err();
    assert!(matches!(err, Error::RecursiveStructure(_)), "{err}");
}

#[test]
fn test_date_time_accepts_string() {
    #[derive(Debug, Deserialize)]
    struct Stamp {
        #[serde(with = "xmlrpc_serde::datetime")]
        at: NaiveDateTime,
    }
    let mut fields = Struct::new();
    fields.insert("at", "2002-08-20T12:34:56Z");
    let stamp: Stamp = from_value(Value::Struct(fields)).unwrap();
    assert_eq!(stamp.at, sample_time());
}

#[test]
fn test_settings_from_json() {
    let config: Config = serde_json::from_str(
        r#"{
            "format": { "use_indentation": false, "use_int_tag": true },
            "non_standard": { "ignore_duplicate_members": true },
            "web": { "timeout_ms": 2500, "headers": [["X-Trace", "1"]] },
            "policy": { "null_member": "nil", "enum_repr": "string" }
        }"#,
    )
    .unwrap();
    assert!(!config.format.use_indentation);
    assert!(config.format.use_int_tag);
    assert!(config.format.use_string_tag);
    assert!(config.non_standard.allow_nil);
    assert!(config.non_standard.ignore_duplicate_members);
    assert_eq!(config.web.timeout(), Some(std::time::Duration::from_millis(2500)));
    assert_eq!(config.web.headers, [("X-Trace".to_string(), "1".to_string())]);
    assert_eq!(config.policy.null_member, xmlrpc_serde::NullMemberAction::Nil);
    assert_eq!(config.policy.enum_repr, xmlrpc_serde::EnumRepr::String);
}
