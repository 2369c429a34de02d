use std::io::{Cursor, Write};

use tempfile::NamedTempFile;
use zip::ZipWriter;
use zip::write::SimpleFileOptions;

use bcf_core::model::{LEGACY_VIEWPOINT_FILE, Topic};
use bcf_io::{BcfFacade, DecodePolicy, IoError, TopicLoader, TopicStore};

/// 在临时文件中组装一个 BCF 归档，条目顺序即写入顺序。
fn build_archive(entries: &[(&str, Vec<u8>)]) -> NamedTempFile {
    let mut tmp = NamedTempFile::new().expect("创建临时归档失败");
    {
        let mut writer = ZipWriter::new(tmp.as_file_mut());
        let options = SimpleFileOptions::default();
        for (name, data) in entries {
            writer.start_file(*name, options).expect("写入条目失败");
            writer.write_all(data).expect("写入条目内容失败");
        }
        writer.finish().expect("收尾归档失败");
    }
    tmp
}

/// 用 image 的 PNG 编码器现做一张 2x2 截图，避免检入二进制夹具。
fn png_bytes() -> Vec<u8> {
    let mut buffer = Cursor::new(Vec::new());
    let pixels = image::RgbaImage::from_pixel(2, 2, image::Rgba([200, 40, 40, 255]));
    image::DynamicImage::ImageRgba8(pixels)
        .write_to(&mut buffer, image::ImageFormat::Png)
        .expect("编码 PNG 失败");
    buffer.into_inner()
}

fn markup_xml(title: &str, comment: &str, viewpoints: &str) -> Vec<u8> {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<Markup>
  <Topic Guid="t-{title}" TopicType="Issue" TopicStatus="Open">
    <Title>{title}</Title>
    <Priority>High</Priority>
    <Index>1</Index>
    <CreationDate>2015-06-01T10:00:00Z</CreationDate>
    <CreationAuthor>alice@example.com</CreationAuthor>
    <Description>Water ingress above axis C</Description>
  </Topic>
  <Comment>
    <Date>2015-06-02T08:30:00Z</Date>
    <Author>bob@example.com</Author>
    <Comment>{comment}</Comment>
  </Comment>
  {viewpoints}
</Markup>
"#
    )
    .into_bytes()
}

fn camera_xml(fov: &str) -> Vec<u8> {
    format!(
        r#"<VisualizationInfo>
  <Components>
    <Component IfcGuid="2MFt08z9rBAeJZF449zSyl"/>
    <Component IfcGuid="0BTBFw6f90Nfh9rP1dlXr2"/>
  </Components>
  <PerspectiveCamera>
    <CameraViewPoint><X>10.5</X><Y>-4.25</Y><Z>1.8</Z></CameraViewPoint>
    <CameraDirection><X>0.0</X><Y>1.0</Y><Z>0.0</Z></CameraDirection>
    <CameraUpVector><X>0.0</X><Y>0.0</Y><Z>1.0</Z></CameraUpVector>
    <FieldOfView>{fov}</FieldOfView>
  </PerspectiveCamera>
</VisualizationInfo>
"#
    )
    .into_bytes()
}

const MODERN_VIEWPOINTS: &str = r#"<Viewpoints Guid="vp-1">
    <Viewpoint>view1.bcfv</Viewpoint>
    <Snapshot>snap1.png</Snapshot>
  </Viewpoints>"#;

#[test]
fn leak_in_roof_scenario_decodes_end_to_end() {
    let archive = build_archive(&[
        (
            "abc/markup.bcf",
            markup_xml("Leak in roof", "Check flashing", MODERN_VIEWPOINTS),
        ),
        ("abc/view1.bcfv", camera_xml("60.0")),
        ("abc/snap1.png", png_bytes()),
    ]);

    let mut store = TopicStore::new();
    store.load(archive.path()).expect("读取 BCF 归档失败");
    assert_eq!(store.len(), 1);

    let topic = &store.topics()[0];
    assert_eq!(topic.source_archive, archive.path());
    assert_eq!(topic.title.as_deref(), Some("Leak in roof"));
    assert_eq!(topic.topic_type.as_deref(), Some("Issue"));
    assert_eq!(topic.topic_status.as_deref(), Some("Open"));
    assert_eq!(topic.guid.as_deref(), Some("t-Leak in roof"));
    assert_eq!(topic.description.as_deref(), Some("Water ingress above axis C"));

    assert_eq!(topic.comments.len(), 1);
    let comment = &topic.comments[0];
    assert_eq!(comment.text.as_deref(), Some("Check flashing"));
    assert!(comment.viewpoint_guid.is_none());
    assert!(comment.viewpoint_index.is_none());

    assert_eq!(topic.viewpoints.len(), 1);
    let viewpoint = &topic.viewpoints[0];
    assert_eq!(viewpoint.guid, "vp-1");
    assert_eq!(viewpoint.camera_file.as_deref(), Some("view1.bcfv"));
    assert_eq!(viewpoint.snapshot_file.as_deref(), Some("abc/snap1.png"));

    let camera = viewpoint.camera.as_ref().expect("应解码出相机位姿");
    assert!((camera.position.x() - 10.5).abs() < 1e-9);
    assert!((camera.position.y() + 4.25).abs() < 1e-9);
    assert!((camera.position.z() - 1.8).abs() < 1e-9);
    assert!((camera.direction.as_vec3().y - 1.0).abs() < 1e-9);
    assert!((camera.up.as_vec3().z - 1.0).abs() < 1e-9);
    assert!((camera.field_of_view_degrees - 60.0).abs() < 1e-9);
    assert_eq!(
        viewpoint.visible_component_ids,
        vec!["2MFt08z9rBAeJZF449zSyl", "0BTBFw6f90Nfh9rP1dlXr2"]
    );

    let snapshot = viewpoint.snapshot.as_ref().expect("应解码出截图");
    assert_eq!(snapshot.width, 2);
    assert_eq!(snapshot.height, 2);
    assert!(!snapshot.rgba.is_empty());

    // 主视点约定：无绑定评论退化到首个视点。
    assert_eq!(topic.comment_viewpoint(comment).unwrap().guid, "vp-1");
}

#[test]
fn one_topic_per_markup_entry_in_entry_order() {
    let archive = build_archive(&[
        ("first/markup.bcf", markup_xml("First", "a", "")),
        ("first/noise.txt", b"ignored".to_vec()),
        ("second/MARKUP.BCF", markup_xml("Second", "b", "")),
        ("third/markup.bcf", markup_xml("Third", "c", "")),
    ]);

    let loader = BcfFacade::new();
    let topics = loader.load(archive.path()).expect("读取 BCF 归档失败");

    let titles: Vec<_> = topics
        .iter()
        .map(|topic| topic.title.as_deref().unwrap_or("<无标题>"))
        .collect();
    assert_eq!(titles, vec!["First", "Second", "Third"]);
}

#[test]
fn modified_fields_default_to_creation_fields() {
    let archive = build_archive(&[(
        "abc/markup.bcf",
        markup_xml("Defaulting", "needs review", ""),
    )]);

    let mut store = TopicStore::new();
    store.load(archive.path()).expect("读取 BCF 归档失败");
    let topic = &store.topics()[0];

    assert_eq!(topic.modified_date, topic.creation_date);
    assert_eq!(topic.modified_author, topic.creation_author);
    assert_eq!(topic.modified_date.as_deref(), Some("2015-06-01T10:00:00Z"));

    let comment = &topic.comments[0];
    assert_eq!(comment.modified_date, comment.date);
    assert_eq!(comment.modified_author, comment.author);
    assert_eq!(comment.modified_author.as_deref(), Some("bob@example.com"));
}

#[test]
fn explicit_modified_fields_are_kept() {
    let markup = r#"<Markup>
  <Topic Guid="t-9">
    <Title>Edited</Title>
    <CreationDate>2015-01-01T00:00:00Z</CreationDate>
    <CreationAuthor>alice</CreationAuthor>
    <ModifiedDate>2015-02-02T00:00:00Z</ModifiedDate>
    <ModifiedAuthor>carol</ModifiedAuthor>
  </Topic>
</Markup>"#;
    let archive = build_archive(&[("abc/markup.bcf", markup.as_bytes().to_vec())]);

    let mut store = TopicStore::new();
    store.load(archive.path()).expect("读取 BCF 归档失败");
    let topic = &store.topics()[0];
    assert_eq!(topic.modified_date.as_deref(), Some("2015-02-02T00:00:00Z"));
    assert_eq!(topic.modified_author.as_deref(), Some("carol"));
}

#[test]
fn comment_viewpoint_guids_resolve_within_topic_only() {
    let markup = r#"<Markup>
  <Topic Guid="t-1"><Title>Refs</Title></Topic>
  <Comment>
    <Date>2015-06-02T08:30:00Z</Date>
    <Author>bob</Author>
    <Comment>matched</Comment>
    <Viewpoint Guid="vp-2"/>
  </Comment>
  <Comment>
    <Date>2015-06-03T08:30:00Z</Date>
    <Author>bob</Author>
    <Comment>dangling</Comment>
    <Viewpoint Guid="vp-of-another-topic"/>
  </Comment>
  <Viewpoints Guid="vp-1"><Viewpoint>a.bcfv</Viewpoint></Viewpoints>
  <Viewpoints Guid="vp-2"><Viewpoint>b.bcfv</Viewpoint></Viewpoints>
</Markup>"#;
    let archive = build_archive(&[("abc/markup.bcf", markup.as_bytes().to_vec())]);

    let mut store = TopicStore::new();
    store.load(archive.path()).expect("读取 BCF 归档失败");
    let topic = &store.topics()[0];
    assert_eq!(topic.viewpoints.len(), 2);

    let matched = &topic.comments[0];
    assert_eq!(matched.viewpoint_guid.as_deref(), Some("vp-2"));
    assert_eq!(matched.viewpoint_index, Some(1));
    assert_eq!(topic.comment_viewpoint(matched).unwrap().guid, "vp-2");

    let dangling = &topic.comments[1];
    assert_eq!(
        dangling.viewpoint_guid.as_deref(),
        Some("vp-of-another-topic")
    );
    assert!(dangling.viewpoint_index.is_none());
}

#[test]
fn legacy_layout_synthesizes_exactly_one_viewpoint() {
    let archive = build_archive(&[
        ("abc/markup.bcf", markup_xml("Legacy", "old style", "")),
        ("abc/viewpoint.bcfv", camera_xml("45.0")),
        ("abc/snapshot.png", png_bytes()),
    ]);

    let mut store = TopicStore::new();
    store.load(archive.path()).expect("读取 BCF 归档失败");
    let topic = &store.topics()[0];

    assert_eq!(topic.viewpoints.len(), 1);
    let viewpoint = &topic.viewpoints[0];
    assert_eq!(viewpoint.guid, LEGACY_VIEWPOINT_FILE);
    assert!(viewpoint.is_legacy());
    assert_eq!(viewpoint.snapshot_file.as_deref(), Some("abc/snapshot.png"));
    assert!(viewpoint.snapshot.is_some());
    let camera = viewpoint.camera.as_ref().expect("旧版相机块应被解码");
    assert!((camera.field_of_view_degrees - 45.0).abs() < 1e-9);
}

#[test]
fn legacy_probe_without_camera_file_yields_no_viewpoints() {
    // 只有游离的 snapshot.png：没有相机文件就不合成视点。
    let archive = build_archive(&[
        ("abc/markup.bcf", markup_xml("NoCamera", "none", "")),
        ("abc/snapshot.png", png_bytes()),
    ]);

    let mut store = TopicStore::new();
    store.load(archive.path()).expect("读取 BCF 归档失败");
    assert!(store.topics()[0].viewpoints.is_empty());
}

#[test]
fn missing_declared_camera_file_is_tolerated() {
    let archive = build_archive(&[(
        "abc/markup.bcf",
        markup_xml("NoBcfv", "camera went missing", MODERN_VIEWPOINTS),
    )]);

    let mut store = TopicStore::new();
    store.load(archive.path()).expect("读取 BCF 归档失败");
    let viewpoint = &store.topics()[0].viewpoints[0];
    assert_eq!(viewpoint.camera_file.as_deref(), Some("view1.bcfv"));
    assert!(viewpoint.camera.is_none());
    assert!(viewpoint.visible_component_ids.is_empty());
}

#[test]
fn missing_snapshot_entry_leaves_image_unset() {
    let archive = build_archive(&[
        (
            "abc/markup.bcf",
            markup_xml("NoSnap", "snapshot lost", MODERN_VIEWPOINTS),
        ),
        ("abc/view1.bcfv", camera_xml("60.0")),
    ]);

    let mut store = TopicStore::new();
    store.load(archive.path()).expect("读取 BCF 归档失败");
    let viewpoint = &store.topics()[0].viewpoints[0];
    assert!(viewpoint.camera.is_some(), "视点本身应解码成功");
    assert_eq!(viewpoint.snapshot_file.as_deref(), Some("abc/snap1.png"));
    assert!(viewpoint.snapshot.is_none());
}

#[test]
fn corrupt_snapshot_bytes_leave_image_unset() {
    let archive = build_archive(&[
        (
            "abc/markup.bcf",
            markup_xml("BadSnap", "not an image", MODERN_VIEWPOINTS),
        ),
        ("abc/view1.bcfv", camera_xml("60.0")),
        ("abc/snap1.png", b"definitely not a png".to_vec()),
    ]);

    let mut store = TopicStore::new();
    store.load(archive.path()).expect("读取 BCF 归档失败");
    let viewpoint = &store.topics()[0].viewpoints[0];
    assert!(viewpoint.camera.is_some());
    assert!(viewpoint.snapshot.is_none());
}

#[test]
fn malformed_field_of_view_aborts_or_skips_by_policy() {
    let entries = [
        ("aaa/markup.bcf", markup_xml("Good", "fine", "")),
        (
            "bbb/markup.bcf",
            markup_xml("Bad", "broken camera", MODERN_VIEWPOINTS),
        ),
        ("bbb/view1.bcfv", camera_xml("abc")),
    ];

    let archive = build_archive(&entries);
    let mut strict = TopicStore::with_policy(DecodePolicy::Abort);
    let err = strict.load(archive.path()).unwrap_err();
    assert!(matches!(err, IoError::MalformedNumber { .. }));
    // Abort 策略下已解码的议题保持不变。
    assert_eq!(strict.len(), 1);
    assert_eq!(strict.topics()[0].title.as_deref(), Some("Good"));

    let archive = build_archive(&entries);
    let mut lenient = TopicStore::new();
    lenient.load(archive.path()).expect("跳过策略不应报错");
    assert_eq!(lenient.len(), 1);
    assert_eq!(lenient.topics()[0].title.as_deref(), Some("Good"));
}

#[test]
fn markup_without_topic_block_fails_that_topic() {
    let archive = build_archive(&[(
        "abc/markup.bcf",
        b"<Markup><Header/></Markup>".to_vec(),
    )]);

    let mut strict = TopicStore::with_policy(DecodePolicy::Abort);
    let err = strict.load(archive.path()).unwrap_err();
    assert!(matches!(err, IoError::MarkupParse { .. }));

    let mut lenient = TopicStore::new();
    lenient.load(archive.path()).expect("跳过策略不应报错");
    assert!(lenient.is_empty());
}

#[test]
fn load_is_idempotent() {
    let archive = build_archive(&[
        (
            "abc/markup.bcf",
            markup_xml("Stable", "same again", MODERN_VIEWPOINTS),
        ),
        ("abc/view1.bcfv", camera_xml("60.0")),
        ("abc/snap1.png", png_bytes()),
    ]);

    let mut store = TopicStore::new();
    store.load(archive.path()).expect("首次读取失败");
    let first: Vec<Topic> = store.topics().to_vec();

    store.load(archive.path()).expect("再次读取失败");
    assert_eq!(store.topics(), first.as_slice());
}

#[test]
fn append_accumulates_topics_with_source_paths() {
    let archive_a = build_archive(&[
        ("one/markup.bcf", markup_xml("A1", "x", "")),
        ("two/markup.bcf", markup_xml("A2", "y", "")),
    ]);
    let archive_b = build_archive(&[("one/markup.bcf", markup_xml("B1", "z", ""))]);

    let mut store = TopicStore::new();
    store.load(archive_a.path()).expect("读取归档 A 失败");
    store.append(archive_b.path()).expect("追加归档 B 失败");

    assert_eq!(store.len(), 3);
    let titles: Vec<_> = store
        .topics()
        .iter()
        .map(|topic| topic.title.as_deref().unwrap_or(""))
        .collect();
    assert_eq!(titles, vec!["A1", "A2", "B1"]);
    assert_eq!(store.topics()[0].source_archive, archive_a.path());
    assert_eq!(store.topics()[1].source_archive, archive_a.path());
    assert_eq!(store.topics()[2].source_archive, archive_b.path());

    store.clear();
    assert!(store.is_empty());
}

#[test]
fn opening_missing_or_invalid_archive_fails() {
    let mut store = TopicStore::new();
    let err = store
        .load(std::path::Path::new("/definitely/not/here.bcfzip"))
        .unwrap_err();
    assert!(matches!(err, IoError::ArchiveOpen { .. }));

    let mut junk = NamedTempFile::new().expect("创建临时文件失败");
    junk.write_all(b"this is not a zip archive")
        .expect("写入临时文件失败");
    let err = store.load(junk.path()).unwrap_err();
    assert!(matches!(err, IoError::ArchiveOpen { .. }));
}

#[test]
fn orthographic_only_camera_file_leaves_pose_unset() {
    let camera = br#"<VisualizationInfo>
  <OrthogonalCamera>
    <ViewToWorldScale>1.0</ViewToWorldScale>
  </OrthogonalCamera>
</VisualizationInfo>"#;
    let archive = build_archive(&[
        (
            "abc/markup.bcf",
            markup_xml("Ortho", "no perspective", MODERN_VIEWPOINTS),
        ),
        ("abc/view1.bcfv", camera.to_vec()),
    ]);

    let mut store = TopicStore::new();
    store.load(archive.path()).expect("读取 BCF 归档失败");
    let viewpoint = &store.topics()[0].viewpoints[0];
    assert!(viewpoint.camera.is_none());
    assert!(viewpoint.snapshot.is_none());
}
