use std::env;
use std::path::PathBuf;

use bcf_config::AppConfig;
use bcf_core::geometry::{Point3, Vector3};
use bcf_core::model::{Comment, PerspectiveCamera, Topic, Viewpoint};
use bcf_io::TopicStore;
use tracing::{info, warn};

use crate::errors::FrontendError;

/// 集合来源，便于前端呈现加载信息。
#[derive(Debug, Clone)]
pub enum CollectionSource {
    Archives(Vec<PathBuf>),
    Demo,
}

/// 统一封装加载后的议题集合与元信息。
#[derive(Debug)]
pub struct LoadedCollection {
    pub topics: Vec<Topic>,
    pub source: CollectionSource,
}

/// 组装议题集合。归档路径按优先级取自：
/// 命令行参数 > 环境变量 `BCF_CLI_SAMPLE` > 配置 `sources.archives`。
/// 命令行显式给出的路径全部失败时报错；其余来源失败则回退到内置示例。
pub fn load_collection(
    paths: &[PathBuf],
    config: &AppConfig,
) -> Result<LoadedCollection, FrontendError> {
    let explicit = !paths.is_empty();
    let mut candidates: Vec<PathBuf> = paths.to_vec();
    if candidates.is_empty() {
        if let Some(path) = env::var_os("BCF_CLI_SAMPLE") {
            candidates.push(PathBuf::from(path));
        }
    }
    if candidates.is_empty() {
        candidates = config.sources.archives.clone();
    }
    if candidates.is_empty() {
        return Ok(demo_collection());
    }

    let mut store = TopicStore::new();
    let mut loaded = Vec::new();
    for path in candidates {
        match store.append(&path) {
            Ok(()) => {
                info!(path = %path.display(), "已加载 BCF 归档");
                loaded.push(path);
            }
            Err(err) => {
                warn!(path = %path.display(), error = %err, "加载 BCF 归档失败");
            }
        }
    }

    if loaded.is_empty() {
        if explicit {
            return Err(FrontendError::NoReadableArchive);
        }
        warn!("配置的归档均不可读，回退到内置示例");
        return Ok(demo_collection());
    }

    Ok(LoadedCollection {
        topics: store.into_topics(),
        source: CollectionSource::Archives(loaded),
    })
}

/// 内置示例：一条带评论与视点的议题，供无输入时快速验证展示路径。
fn demo_collection() -> LoadedCollection {
    let mut topic = Topic::new("<内置示例>");
    topic.guid = Some("demo-topic".to_string());
    topic.topic_type = Some("Issue".to_string());
    topic.topic_status = Some("Open".to_string());
    topic.title = Some("屋面渗漏".to_string());
    topic.priority = Some("High".to_string());
    topic.creation_date = Some("2015-06-01T10:00:00Z".to_string());
    topic.creation_author = Some("alice@example.com".to_string());
    topic.modified_date = topic.creation_date.clone();
    topic.modified_author = topic.creation_author.clone();
    topic.description = Some("C 轴上方有渗水痕迹".to_string());

    let mut viewpoint = Viewpoint::new("demo-viewpoint");
    viewpoint.camera_file = Some("view1.bcfv".to_string());
    viewpoint.camera = Some(PerspectiveCamera {
        position: Point3::new(10.5, -4.25, 1.8),
        direction: Vector3::new(0.0, 1.0, 0.0),
        up: Vector3::new(0.0, 0.0, 1.0),
        field_of_view_degrees: 60.0,
    });
    topic.viewpoints.push(viewpoint);

    let mut comment = Comment::new();
    comment.date = Some("2015-06-02T08:30:00Z".to_string());
    comment.author = Some("bob@example.com".to_string());
    comment.modified_date = comment.date.clone();
    comment.modified_author = comment.author.clone();
    comment.text = Some("请检查泛水板".to_string());
    comment.viewpoint_guid = Some("demo-viewpoint".to_string());
    comment.viewpoint_index = Some(0);
    topic.comments.push(comment);

    LoadedCollection {
        topics: vec![topic],
        source: CollectionSource::Demo,
    }
}
