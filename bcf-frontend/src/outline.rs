use std::path::Path;

use bcf_core::model::{Comment, Topic};

/// 浏览树的一行：文件、议题或评论。每个节点恰好是一种身份。
#[derive(Debug)]
pub enum OutlineNode<'a> {
    File { path: &'a Path },
    Topic { topic: &'a Topic },
    Comment { topic: &'a Topic, comment: &'a Comment },
}

/// 按集合顺序展开 文件→议题→评论 的浏览树。
/// 议题保持追加顺序，来源归档变化时插入新的文件节点。
pub fn build_outline(topics: &[Topic]) -> Vec<OutlineNode<'_>> {
    let mut rows = Vec::new();
    let mut current_file: Option<&Path> = None;

    for topic in topics {
        if current_file != Some(topic.source_archive.as_path()) {
            current_file = Some(topic.source_archive.as_path());
            rows.push(OutlineNode::File {
                path: topic.source_archive.as_path(),
            });
        }
        rows.push(OutlineNode::Topic { topic });
        for comment in &topic.comments {
            rows.push(OutlineNode::Comment { topic, comment });
        }
    }
    rows
}
