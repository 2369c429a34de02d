use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use quick_xml::Reader;
use quick_xml::events::Event;
use thiserror::Error;
use tracing::warn;
use zip::ZipArchive;
use zip::result::ZipError;

use bcf_core::geometry::{Point3, Vector3};
use bcf_core::model::{
    Comment, LEGACY_SNAPSHOT_FILE, LEGACY_VIEWPOINT_FILE, PerspectiveCamera, Snapshot, Topic,
    Viewpoint,
};

/// 每个 Topic 文件夹内固定的标记文件名（按后缀大小写不敏感匹配）。
pub const MARKUP_FILE_NAME: &str = "markup.bcf";

#[derive(Debug, Error)]
pub enum IoError {
    #[error("failed to open archive {path:?}: {source}")]
    ArchiveOpen {
        path: PathBuf,
        #[source]
        source: ZipError,
    },
    #[error("entry {name:?} not found in archive")]
    EntryNotFound { name: String },
    #[error("failed to read entry {name:?}: {source}")]
    EntryRead {
        name: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid markup document {entry:?}: {message}")]
    MarkupParse { entry: String, message: String },
    #[error("malformed number in {context} (value: {value:?})")]
    MalformedNumber { context: String, value: String },
}

/// 打开一个 BCF 归档并解码其中全部议题。
pub trait TopicLoader {
    fn load(&self, path: &Path) -> Result<Vec<Topic>, IoError>;
}

pub struct BcfFacade;

impl BcfFacade {
    pub fn new() -> Self {
        Self
    }
}

impl TopicLoader for BcfFacade {
    fn load(&self, path: &Path) -> Result<Vec<Topic>, IoError> {
        let mut archive = BcfArchive::open(path)?;
        let mut topics = Vec::new();
        for entry in archive.entry_names() {
            if !is_markup_entry(&entry) {
                continue;
            }
            let folder = folder_prefix(&entry).to_string();
            topics.push(decode_markup(&mut archive, &entry, &folder)?);
        }
        Ok(topics)
    }
}

/// 单个 Topic 解码失败时聚合器的处置方式。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodePolicy {
    /// 立即返回错误；已解码的议题保持不变。
    Abort,
    /// 记录警告并跳过该议题，继续处理后续条目。
    SkipTopic,
}

impl Default for DecodePolicy {
    fn default() -> Self {
        DecodePolicy::SkipTopic
    }
}

/// 聚合集合：跨一个或多个归档、按条目顺序排列的议题序列。
/// 解码是同步的，归档句柄仅在单次 `load`/`append` 调用内持有。
#[derive(Debug)]
pub struct TopicStore {
    topics: Vec<Topic>,
    policy: DecodePolicy,
}

impl TopicStore {
    pub fn new() -> Self {
        Self::with_policy(DecodePolicy::default())
    }

    pub fn with_policy(policy: DecodePolicy) -> Self {
        Self {
            topics: Vec::new(),
            policy,
        }
    }

    /// 清空集合后解码整个归档。
    pub fn load(&mut self, path: &Path) -> Result<(), IoError> {
        self.topics.clear();
        self.append(path)
    }

    /// 不清空地追加解码整个归档。跨归档的重复议题不做去重：
    /// 多位审阅者的导出都会被保留。
    pub fn append(&mut self, path: &Path) -> Result<(), IoError> {
        let mut archive = BcfArchive::open(path)?;
        for entry in archive.entry_names() {
            if !is_markup_entry(&entry) {
                continue;
            }
            let folder = folder_prefix(&entry).to_string();
            match decode_markup(&mut archive, &entry, &folder) {
                Ok(topic) => self.topics.push(topic),
                Err(err) => match self.policy {
                    DecodePolicy::Abort => return Err(err),
                    DecodePolicy::SkipTopic => {
                        warn!(
                            archive = %path.display(),
                            entry = %entry,
                            error = %err,
                            "跳过无法解码的议题"
                        );
                    }
                },
            }
        }
        Ok(())
    }

    pub fn clear(&mut self) {
        self.topics.clear();
    }

    #[inline]
    pub fn topics(&self) -> &[Topic] {
        &self.topics
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.topics.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.topics.is_empty()
    }

    pub fn into_topics(self) -> Vec<Topic> {
        self.topics
    }
}

impl Default for TopicStore {
    fn default() -> Self {
        Self::new()
    }
}

/// ZIP 归档读取器。持有打开的文件句柄，随自身销毁而释放。
pub struct BcfArchive {
    path: PathBuf,
    archive: ZipArchive<File>,
}

impl BcfArchive {
    pub fn open(path: &Path) -> Result<Self, IoError> {
        let file = File::open(path).map_err(|source| IoError::ArchiveOpen {
            path: path.to_path_buf(),
            source: ZipError::Io(source),
        })?;
        let archive = ZipArchive::new(file).map_err(|source| IoError::ArchiveOpen {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self {
            path: path.to_path_buf(),
            archive,
        })
    }

    #[inline]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 返回归档内全部条目名，保持中央目录顺序。
    /// 拷贝为自有列表，迭代期间仍可读取条目内容。
    pub fn entry_names(&self) -> Vec<String> {
        self.archive.file_names().map(str::to_string).collect()
    }

    #[inline]
    pub fn has_entry(&self, name: &str) -> bool {
        self.archive.index_for_name(name).is_some()
    }

    /// 读出指定条目的完整内容。条目不存在时返回 `EntryNotFound`。
    pub fn read_entry(&mut self, name: &str) -> Result<Vec<u8>, IoError> {
        let mut entry = match self.archive.by_name(name) {
            Ok(entry) => entry,
            Err(ZipError::FileNotFound) => {
                return Err(IoError::EntryNotFound {
                    name: name.to_string(),
                });
            }
            Err(source) => {
                return Err(IoError::ArchiveOpen {
                    path: self.path.clone(),
                    source,
                });
            }
        };
        let mut data = Vec::with_capacity(entry.size() as usize);
        entry
            .read_to_end(&mut data)
            .map_err(|source| IoError::EntryRead {
                name: name.to_string(),
                source,
            })?;
        Ok(data)
    }
}

/// 条目是否是某个 Topic 的标记文件。
pub fn is_markup_entry(name: &str) -> bool {
    name.to_ascii_lowercase().ends_with(MARKUP_FILE_NAME)
}

/// 条目名中到最后一个路径分隔符为止（含）的前缀；无分隔符时为空串。
fn folder_prefix(entry_name: &str) -> &str {
    match entry_name.rfind('/') {
        Some(pos) => &entry_name[..=pos],
        None => "",
    }
}

/// 解码一个标记文件，产出完整填充的 Topic。
/// 结构性失败（XML 不可解析、缺少 Topic 块、相机数值损坏）使整个 Topic 失败。
fn decode_markup(archive: &mut BcfArchive, entry_name: &str, folder: &str) -> Result<Topic, IoError> {
    let data = archive.read_entry(entry_name)?;
    let root = parse_xml_tree(&data, entry_name)?;

    let topic_node = root
        .first_child("Topic")
        .ok_or_else(|| IoError::MarkupParse {
            entry: entry_name.to_string(),
            message: "缺少必需的 Topic 元素".to_string(),
        })?;

    let mut topic = Topic::new(archive.path());
    topic.guid = attribute_opt(topic_node, "Guid");
    topic.topic_type = attribute_opt(topic_node, "TopicType");
    topic.topic_status = attribute_opt(topic_node, "TopicStatus");
    topic.title = child_text_opt(topic_node, "Title");
    topic.priority = child_text_opt(topic_node, "Priority");
    topic.index = child_text_opt(topic_node, "Index");
    topic.creation_date = child_text_opt(topic_node, "CreationDate");
    topic.creation_author = child_text_opt(topic_node, "CreationAuthor");
    topic.description = child_text_opt(topic_node, "Description");
    // 修改信息缺省时回填创建信息。
    topic.modified_date =
        child_text_opt(topic_node, "ModifiedDate").or_else(|| topic.creation_date.clone());
    topic.modified_author =
        child_text_opt(topic_node, "ModifiedAuthor").or_else(|| topic.creation_author.clone());

    for node in root.children("Comment") {
        let mut comment = Comment::new();
        comment.date = child_text_opt(node, "Date");
        comment.author = child_text_opt(node, "Author");
        comment.text = child_text_opt(node, "Comment");
        comment.modified_date =
            child_text_opt(node, "ModifiedDate").or_else(|| comment.date.clone());
        comment.modified_author =
            child_text_opt(node, "ModifiedAuthor").or_else(|| comment.author.clone());
        comment.viewpoint_guid = node
            .first_child("Viewpoint")
            .and_then(|viewpoint| viewpoint.attribute("Guid"))
            .map(str::to_string);
        topic.comments.push(comment);
    }

    // 2.x 布局：根级的每个 Viewpoints 元素描述一个视点。
    for node in root.children("Viewpoints") {
        let guid = node.attribute("Guid").unwrap_or_default().to_string();
        let mut viewpoint = Viewpoint::new(guid);
        viewpoint.camera_file = child_text_opt(node, "Viewpoint").filter(|name| !name.is_empty());
        let snapshot_name = child_text_opt(node, "Snapshot").filter(|name| !name.is_empty());
        viewpoint.snapshot_file = snapshot_name.map(|name| format!("{folder}{name}"));

        if let Some(camera_file) = viewpoint.camera_file.clone() {
            decode_viewpoint_camera(archive, &format!("{folder}{camera_file}"), &mut viewpoint)?;
        }
        if let Some(snapshot_entry) = viewpoint.snapshot_file.clone() {
            viewpoint.snapshot = decode_snapshot(archive, &snapshot_entry);
        }
        topic.viewpoints.push(viewpoint);
    }

    // 1.0 布局：没有 Viewpoints 元素时探测固定文件名，合成单个视点。
    if topic.viewpoints.is_empty() {
        let camera_entry = format!("{folder}{LEGACY_VIEWPOINT_FILE}");
        if archive.has_entry(&camera_entry) {
            let mut viewpoint = Viewpoint::new(LEGACY_VIEWPOINT_FILE);
            viewpoint.camera_file = Some(LEGACY_VIEWPOINT_FILE.to_string());
            let snapshot_entry = format!("{folder}{LEGACY_SNAPSHOT_FILE}");
            if archive.has_entry(&snapshot_entry) {
                viewpoint.snapshot_file = Some(snapshot_entry.clone());
                viewpoint.snapshot = decode_snapshot(archive, &snapshot_entry);
            }
            decode_viewpoint_camera(archive, &camera_entry, &mut viewpoint)?;
            topic.viewpoints.push(viewpoint);
        }
    }

    resolve_comment_viewpoints(&mut topic);
    Ok(topic)
}

/// 后置解析：按 GUID 将评论弱引用到视点下标。
/// 引用落空不是错误，部分生产方会引用其他 Topic 的视点或已删除的视点。
fn resolve_comment_viewpoints(topic: &mut Topic) {
    let mut guid_index: HashMap<&str, usize> = HashMap::new();
    for (index, viewpoint) in topic.viewpoints.iter().enumerate() {
        // 重复 GUID 时保留首个，与按列表顺序扫描一致。
        guid_index.entry(viewpoint.guid.as_str()).or_insert(index);
    }
    for comment in &mut topic.comments {
        if let Some(guid) = &comment.viewpoint_guid {
            comment.viewpoint_index = guid_index.get(guid.as_str()).copied();
        }
    }
}

/// 解析一个相机定义文件（bcfv），填充视点的相机位姿与可见构件列表。
///
/// 条目缺失与缺少 PerspectiveCamera 块都不是错误（正交相机或无相机被容忍）；
/// 已存在的相机块内数值损坏则以 `MalformedNumber` 上抛。
fn decode_viewpoint_camera(
    archive: &mut BcfArchive,
    entry_name: &str,
    viewpoint: &mut Viewpoint,
) -> Result<(), IoError> {
    let data = match archive.read_entry(entry_name) {
        Ok(data) => data,
        Err(IoError::EntryNotFound { .. }) => {
            warn!(entry = entry_name, "相机定义文件缺失，视点保留默认状态");
            return Ok(());
        }
        Err(err) => return Err(err),
    };
    let root = parse_xml_tree(&data, entry_name)?;

    if let Some(camera) = root.first_child("PerspectiveCamera") {
        let (px, py, pz) = read_triplet(camera, "CameraViewPoint")?;
        let (dx, dy, dz) = read_triplet(camera, "CameraDirection")?;
        let (ux, uy, uz) = read_triplet(camera, "CameraUpVector")?;
        let raw_fov = camera.child_text("FieldOfView").unwrap_or_default();
        let field_of_view = parse_f64(raw_fov, "PerspectiveCamera.FieldOfView")?;
        viewpoint.camera = Some(PerspectiveCamera {
            position: Point3::new(px, py, pz),
            direction: Vector3::new(dx, dy, dz),
            up: Vector3::new(ux, uy, uz),
            field_of_view_degrees: field_of_view,
        });
    }

    if let Some(components) = root.first_child("Components") {
        for component in components.children("Component") {
            if let Some(guid) = component.attribute("IfcGuid") {
                if !guid.is_empty() {
                    viewpoint.visible_component_ids.push(guid.to_string());
                }
            }
        }
    }

    Ok(())
}

/// 读取并解码截图条目。任何失败都降级为警告，视点保持无图状态。
fn decode_snapshot(archive: &mut BcfArchive, entry_name: &str) -> Option<Snapshot> {
    let data = match archive.read_entry(entry_name) {
        Ok(data) => data,
        Err(err) => {
            warn!(entry = entry_name, error = %err, "读取截图失败，视点保留无图状态");
            return None;
        }
    };
    match image::load_from_memory(&data) {
        Ok(decoded) => {
            let rgba = decoded.to_rgba8();
            Some(Snapshot {
                width: rgba.width(),
                height: rgba.height(),
                rgba: rgba.into_raw(),
            })
        }
        Err(err) => {
            warn!(entry = entry_name, error = %err, "截图解码失败，视点保留无图状态");
            None
        }
    }
}

/// 读相机块内一个三元向量（X/Y/Z 子元素）。
/// 相机块既然存在，坐标缺失或非法都视为数值损坏。
fn read_triplet(camera: &XmlElement, tag: &str) -> Result<(f64, f64, f64), IoError> {
    let node = camera.first_child(tag);
    let component = |axis: &str| -> Result<f64, IoError> {
        let raw = node.and_then(|n| n.child_text(axis)).unwrap_or_default();
        parse_f64(raw, &format!("PerspectiveCamera.{tag}.{axis}"))
    };
    Ok((component("X")?, component("Y")?, component("Z")?))
}

fn parse_f64(raw: &str, context: &str) -> Result<f64, IoError> {
    raw.trim()
        .parse::<f64>()
        .map_err(|_| IoError::MalformedNumber {
            context: context.to_string(),
            value: raw.to_string(),
        })
}

/// 轻量 XML 元素树。BCF 文档体量小，整树载入后用
/// 宽容访问器提取字段：缺失是数据而不是错误。
#[derive(Debug, Default, Clone)]
struct XmlElement {
    name: String,
    attributes: Vec<(String, String)>,
    text: String,
    children: Vec<XmlElement>,
}

impl XmlElement {
    /// 首个名为 `tag` 的直接子元素的文本；无此子元素时为 None。
    fn child_text(&self, tag: &str) -> Option<&str> {
        self.first_child(tag).map(|child| child.text.as_str())
    }

    /// 指定属性的值；同名属性多次出现时以最后一次为准。
    fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .rev()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    fn first_child(&self, tag: &str) -> Option<&XmlElement> {
        self.children.iter().find(|child| child.name == tag)
    }

    /// 按文档顺序迭代名为 `tag` 的直接子元素。
    fn children<'a>(&'a self, tag: &'a str) -> impl Iterator<Item = &'a XmlElement> + 'a {
        self.children.iter().filter(move |child| child.name == tag)
    }
}

fn child_text_opt(node: &XmlElement, tag: &str) -> Option<String> {
    node.child_text(tag).map(str::to_string)
}

fn attribute_opt(node: &XmlElement, name: &str) -> Option<String> {
    node.attribute(name).map(str::to_string)
}

/// 去掉命名空间前缀，仅保留本地元素名。
fn local_name(name: &str) -> &str {
    match name.rfind(':') {
        Some(pos) => &name[pos + 1..],
        None => name,
    }
}

/// 把 quick-xml 事件流折叠为自有元素树，返回文档根元素。
fn parse_xml_tree(data: &[u8], entry_name: &str) -> Result<XmlElement, IoError> {
    let markup_error = |message: String| IoError::MarkupParse {
        entry: entry_name.to_string(),
        message,
    };

    let mut reader = Reader::from_reader(data);
    reader.config_mut().trim_text(true);

    let mut buf = Vec::new();
    let mut stack: Vec<XmlElement> = Vec::new();
    let mut root: Option<XmlElement> = None;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => {
                let element = element_from_tag(e, entry_name)?;
                stack.push(element);
            }
            Ok(Event::Empty(ref e)) => {
                let element = element_from_tag(e, entry_name)?;
                attach(&mut stack, &mut root, element);
            }
            Ok(Event::Text(ref t)) => {
                if let Some(top) = stack.last_mut() {
                    let text = t
                        .xml_content()
                        .map_err(|err| markup_error(format!("文本解码失败: {err}")))?;
                    top.text.push_str(&text);
                }
            }
            Ok(Event::CData(ref t)) => {
                if let Some(top) = stack.last_mut() {
                    top.text.push_str(&String::from_utf8_lossy(t));
                }
            }
            Ok(Event::End(_)) => {
                let Some(element) = stack.pop() else {
                    return Err(markup_error("多余的元素结束标记".to_string()));
                };
                attach(&mut stack, &mut root, element);
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(err) => return Err(markup_error(format!("XML 解析失败: {err}"))),
        }
        buf.clear();
    }

    if !stack.is_empty() {
        return Err(markup_error("文档在元素闭合前结束".to_string()));
    }
    root.ok_or_else(|| markup_error("文档中没有任何元素".to_string()))
}

fn element_from_tag(
    tag: &quick_xml::events::BytesStart<'_>,
    entry_name: &str,
) -> Result<XmlElement, IoError> {
    let markup_error = |message: String| IoError::MarkupParse {
        entry: entry_name.to_string(),
        message,
    };

    let tag_name = tag.name();
    let name = std::str::from_utf8(tag_name.as_ref())
        .map_err(|err| markup_error(format!("元素名不是合法 UTF-8: {err}")))?;
    let mut element = XmlElement {
        name: local_name(name).to_string(),
        ..XmlElement::default()
    };
    for attr in tag.attributes() {
        let attr = attr.map_err(|err| markup_error(format!("属性解析失败: {err}")))?;
        let key = std::str::from_utf8(attr.key.as_ref())
            .map_err(|err| markup_error(format!("属性名不是合法 UTF-8: {err}")))?;
        let value = attr
            .unescape_value()
            .map_err(|err| markup_error(format!("属性值解码失败: {err}")))?;
        element
            .attributes
            .push((local_name(key).to_string(), value.into_owned()));
    }
    Ok(element)
}

fn attach(stack: &mut Vec<XmlElement>, root: &mut Option<XmlElement>, element: XmlElement) {
    match stack.last_mut() {
        Some(parent) => parent.children.push(element),
        // 多个顶层元素时保留首个作为根。
        None => {
            if root.is_none() {
                *root = Some(element);
            }
        }
    }
}
