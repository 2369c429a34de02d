use bcf_config::AppConfig;
use bcf_core::model::{Comment, Topic, Viewpoint};
use tracing::info;

use crate::loader::{CollectionSource, LoadedCollection};
use crate::outline::{OutlineNode, build_outline};

/// 简易 CLI 展示：打印 文件→议题→评论 浏览树与每个视点的概览。
pub fn render(collection: &LoadedCollection, config: &AppConfig) {
    let topic_count = collection.topics.len();
    let comment_count: usize = collection
        .topics
        .iter()
        .map(|topic| topic.comments.len())
        .sum();
    let viewpoint_count: usize = collection
        .topics
        .iter()
        .map(|topic| topic.viewpoints.len())
        .sum();
    info!(topic_count, comment_count, viewpoint_count, "BCF 集合统计");

    println!("BCF 议题浏览器");
    match &collection.source {
        CollectionSource::Archives(paths) => {
            println!("已加载 {} 个归档：", paths.len());
            for path in paths {
                println!("  - {}", path.display());
            }
        }
        CollectionSource::Demo => {
            println!("未指定归档，展示内置示例。");
        }
    }

    for row in build_outline(&collection.topics) {
        match row {
            OutlineNode::File { path } => {
                println!("归档 {}", path.display());
            }
            OutlineNode::Topic { topic } => {
                print_topic(topic);
                for viewpoint in &topic.viewpoints {
                    print_viewpoint(viewpoint, config);
                }
            }
            OutlineNode::Comment { topic, comment } => {
                if config.viewer.show_comments {
                    print_comment(topic, comment);
                }
            }
        }
    }
}

fn print_topic(topic: &Topic) {
    println!(
        "  议题 \"{}\" [类型={}, 状态={}, 优先级={}]",
        field(&topic.title),
        field(&topic.topic_type),
        field(&topic.topic_status),
        field(&topic.priority),
    );
    println!(
        "    创建 {} / {}，修改 {} / {}",
        field(&topic.creation_date),
        field(&topic.creation_author),
        field(&topic.modified_date),
        field(&topic.modified_author),
    );
    if let Some(description) = &topic.description {
        println!("    描述：{}", description.replace('\n', " "));
    }
}

fn print_comment(topic: &Topic, comment: &Comment) {
    let viewpoint_label = match topic.comment_viewpoint(comment) {
        Some(viewpoint) if comment.viewpoint_index.is_some() => {
            format!("视点 {}", viewpoint.guid)
        }
        Some(viewpoint) => format!("主视点 {}", viewpoint.guid),
        None => "无视点".to_string(),
    };
    println!(
        "    评论 [{} / {}] ({}): {}",
        field(&comment.date),
        field(&comment.author),
        viewpoint_label,
        field(&comment.text).replace('\n', " "),
    );
}

fn print_viewpoint(viewpoint: &Viewpoint, config: &AppConfig) {
    let camera_label = match &viewpoint.camera {
        Some(camera) => format!(
            "位置=({:.2}, {:.2}, {:.2}), 视场角={:.1}°",
            camera.position.x(),
            camera.position.y(),
            camera.position.z(),
            camera.field_of_view_degrees
        ),
        None => "无相机".to_string(),
    };
    let snapshot_label = match &viewpoint.snapshot {
        Some(snapshot) => format!("{}x{}", snapshot.width, snapshot.height),
        None => "无".to_string(),
    };
    println!(
        "    视点 {} [相机: {}; 截图: {}; 构件数={}]",
        viewpoint.guid,
        camera_label,
        snapshot_label,
        viewpoint.visible_component_ids.len(),
    );
    if config.viewer.show_components && !viewpoint.visible_component_ids.is_empty() {
        println!(
            "      可见构件: {}",
            viewpoint.visible_component_ids.join(", ")
        );
    }
}

fn field(value: &Option<String>) -> &str {
    value.as_deref().unwrap_or("<未填写>")
}
