/// 一次遍历中发现的变化
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeSet {
    pub new_files: Vec<String>,
    pub size_changed: Vec<String>,
    pub date_changed: Vec<String>,
}

impl ChangeSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_new(&mut self, path: String) {
        self.new_files.push(path);
    }

    pub fn add_size_changed(&mut self, path: String) {
        self.size_changed.push(path);
    }

    pub fn add_date_changed(&mut self, path: String) {
        self.date_changed.push(path);
    }

    pub fn any_found(&self) -> bool {
        !(self.new_files.is_empty() && self.size_changed.is_empty() && self.date_changed.is_empty())
    }

    pub fn total(&self) -> usize {
        self.new_files.len() + self.size_changed.len() + self.date_changed.len()
    }
}
