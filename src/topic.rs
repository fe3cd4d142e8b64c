//! Component A — topic parsing.

/// Maximum number of `/`-delimited segments kept when splitting a topic.
const MAX_PARTS: usize = 100;

/// A topic split on `/`, preserving the empty leading element produced by a
/// leading slash.
///
/// By convention: `parts()[0]` is empty, `[1]` is the org, `[2]` the device,
/// `[3]` the scope, `[4]` the name, `[5]` the version, and `[6..]` the
/// sub-path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicParts {
    parts: Vec<String>,
}

impl TopicParts {
    /// Split `topic` on `/`, bounded to [`MAX_PARTS`] segments.
    pub fn parse(topic: &str) -> Self {
        let parts = topic.splitn(MAX_PARTS, '/').map(str::to_owned).collect();
        Self { parts }
    }

    pub fn len(&self) -> usize {
        self.parts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&str> {
        self.parts.get(index).map(String::as_str)
    }

    pub fn org(&self) -> Option<&str> {
        self.get(1)
    }

    pub fn device(&self) -> Option<&str> {
        self.get(2)
    }

    pub fn scope(&self) -> Option<&str> {
        self.get(3)
    }

    pub fn name(&self) -> Option<&str> {
        self.get(4)
    }

    pub fn version(&self) -> Option<&str> {
        self.get(5)
    }

    /// `scope + "/" + name`, or `None` if either part is missing.
    pub fn capability(&self) -> Option<String> {
        Some(format!("{}/{}", self.scope()?, self.name()?))
    }

    /// `/`-join of everything from index 6 onward; empty string if there
    /// are fewer than 7 parts.
    pub fn sub_path(&self) -> String {
        if self.parts.len() <= 6 {
            String::new()
        } else {
            self.parts[6..].join("/")
        }
    }
}
