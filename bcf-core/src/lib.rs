pub mod geometry {
    use glam::DVec3;
    use serde::{Deserialize, Serialize};

    /// 三维点，内部以 `glam::DVec3` 表示，单位为米，与 BCF 相机坐标一致。
    #[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
    pub struct Point3(pub DVec3);

    impl Point3 {
        #[inline]
        pub fn new(x: f64, y: f64, z: f64) -> Self {
            Self(DVec3::new(x, y, z))
        }

        #[inline]
        pub fn x(self) -> f64 {
            self.0.x
        }

        #[inline]
        pub fn y(self) -> f64 {
            self.0.y
        }

        #[inline]
        pub fn z(self) -> f64 {
            self.0.z
        }

        #[inline]
        pub fn as_vec3(self) -> DVec3 {
            self.0
        }
    }

    impl From<DVec3> for Point3 {
        fn from(value: DVec3) -> Self {
            Self(value)
        }
    }

    /// 三维向量，用于相机朝向与上方向。
    #[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
    pub struct Vector3(pub DVec3);

    impl Vector3 {
        #[inline]
        pub fn new(x: f64, y: f64, z: f64) -> Self {
            Self(DVec3::new(x, y, z))
        }

        #[inline]
        pub fn as_vec3(self) -> DVec3 {
            self.0
        }

        #[inline]
        pub fn length_squared(self) -> f64 {
            self.0.length_squared()
        }

        #[inline]
        pub fn normalize(self) -> Option<Self> {
            let len = self.0.length();
            if len <= f64::EPSILON {
                None
            } else {
                Some(Self(self.0 / len))
            }
        }

        #[inline]
        pub fn dot(self, other: Vector3) -> f64 {
            self.0.dot(other.0)
        }
    }

    impl From<DVec3> for Vector3 {
        fn from(value: DVec3) -> Self {
            Self(value)
        }
    }
}

pub mod model {
    use std::path::PathBuf;

    use serde::{Deserialize, Serialize};

    use crate::geometry::{Point3, Vector3};

    /// 旧版（BCF 1.0）单视点布局使用的固定相机文件名，
    /// 同时作为合成视点的伪 GUID。
    pub const LEGACY_VIEWPOINT_FILE: &str = "viewpoint.bcfv";

    /// 旧版布局的固定截图文件名。
    pub const LEGACY_SNAPSHOT_FILE: &str = "snapshot.png";

    /// 透视相机位姿。仅当相机文件中存在 `PerspectiveCamera` 块时才会构造，
    /// 因此持有该结构即代表位姿字段可信。
    #[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
    pub struct PerspectiveCamera {
        pub position: Point3,
        pub direction: Vector3,
        pub up: Vector3,
        pub field_of_view_degrees: f64,
    }

    /// 解码后的截图位图，RGBA8 行主序。
    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    pub struct Snapshot {
        pub width: u32,
        pub height: u32,
        pub rgba: Vec<u8>,
    }

    /// 一个视点：相机位姿、可见构件列表与可选截图。
    /// 由所属 Topic 独占持有，解码完成后不再修改。
    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    pub struct Viewpoint {
        pub guid: String,
        /// 标记文件中声明的相机定义文件名（相对 Topic 文件夹）。
        pub camera_file: Option<String>,
        /// 截图在归档内的完整条目名；未声明或为空时为 None。
        pub snapshot_file: Option<String>,
        pub camera: Option<PerspectiveCamera>,
        /// IFC 构件 GUID，保持相机文件中的出现顺序。
        pub visible_component_ids: Vec<String>,
        pub snapshot: Option<Snapshot>,
    }

    impl Viewpoint {
        /// 以给定 GUID 构造空视点，其余字段等待解码填充。
        pub fn new(guid: impl Into<String>) -> Self {
            Self {
                guid: guid.into(),
                camera_file: None,
                snapshot_file: None,
                camera: None,
                visible_component_ids: Vec::new(),
                snapshot: None,
            }
        }

        /// 是否为旧版布局合成的视点。
        #[inline]
        pub fn is_legacy(&self) -> bool {
            self.guid == LEGACY_VIEWPOINT_FILE
        }
    }

    /// 一条讨论评论。`viewpoint_index` 是解析后的弱引用：
    /// 指向所属 Topic `viewpoints` 的下标，不构成第二条所有权边。
    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    pub struct Comment {
        pub date: Option<String>,
        pub author: Option<String>,
        /// 缺省时在解码阶段回填创建日期。
        pub modified_date: Option<String>,
        /// 缺省时在解码阶段回填创建作者。
        pub modified_author: Option<String>,
        pub text: Option<String>,
        /// 标记文件中引用的视点 GUID，未引用时为 None。
        pub viewpoint_guid: Option<String>,
        /// GUID 匹配成功后填充；引用其他 Topic 的视点或已删除视点时保持 None。
        pub viewpoint_index: Option<usize>,
    }

    impl Comment {
        pub fn new() -> Self {
            Self {
                date: None,
                author: None,
                modified_date: None,
                modified_author: None,
                text: None,
                viewpoint_guid: None,
                viewpoint_index: None,
            }
        }
    }

    impl Default for Comment {
        fn default() -> Self {
            Self::new()
        }
    }

    /// 一条议题记录。`topic_type` 与 `topic_status` 保持自由字符串：
    /// BCF 允许生产方写入任意取值，不做封闭枚举。
    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    pub struct Topic {
        /// 来源归档路径。多归档合并时据此追溯每条议题的出处。
        pub source_archive: PathBuf,
        pub guid: Option<String>,
        pub topic_type: Option<String>,
        pub topic_status: Option<String>,
        pub title: Option<String>,
        pub priority: Option<String>,
        pub index: Option<String>,
        pub creation_date: Option<String>,
        pub creation_author: Option<String>,
        pub modified_date: Option<String>,
        pub modified_author: Option<String>,
        pub description: Option<String>,
        pub comments: Vec<Comment>,
        pub viewpoints: Vec<Viewpoint>,
    }

    impl Topic {
        pub fn new(source_archive: impl Into<PathBuf>) -> Self {
            Self {
                source_archive: source_archive.into(),
                guid: None,
                topic_type: None,
                topic_status: None,
                title: None,
                priority: None,
                index: None,
                creation_date: None,
                creation_author: None,
                modified_date: None,
                modified_author: None,
                description: None,
                comments: Vec::new(),
                viewpoints: Vec::new(),
            }
        }

        /// 约定首个视点为该议题的主视点，
        /// 评论未绑定具体视点时以它作为展示回退。
        #[inline]
        pub fn primary_viewpoint(&self) -> Option<&Viewpoint> {
            self.viewpoints.first()
        }

        /// 取评论关联的视点：优先用解析出的弱引用，否则退化到主视点。
        pub fn comment_viewpoint(&self, comment: &Comment) -> Option<&Viewpoint> {
            match comment.viewpoint_index {
                Some(index) => self.viewpoints.get(index),
                None => self.primary_viewpoint(),
            }
        }
    }

}
