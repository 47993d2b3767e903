//! In-memory directory tree: [`Folder`] and [`File`], with case-insensitive,
//! order-preserving, MacRoman-keyed children.

use std::collections::HashMap;

use crate::error::Result;
use crate::macroman::{self, NameKind};

/// A file's two forks plus its classic Finder metadata.
#[derive(Debug, Clone)]
pub struct File {
    pub file_type: [u8; 4],
    pub creator: [u8; 4],
    pub flags: u16,
    pub x: i16,
    pub y: i16,
    pub locked: bool,
    pub crdate: u32,
    pub mddate: u32,
    pub bkdate: u32,
    pub data: Vec<u8>,
    pub rsrc: Vec<u8>,
}

impl Default for File {
    fn default() -> Self {
        File {
            file_type: *b"????",
            creator: *b"????",
            flags: 0,
            x: 0,
            y: 0,
            locked: false,
            crdate: 0,
            mddate: 0,
            bkdate: 0,
            data: Vec::new(),
            rsrc: Vec::new(),
        }
    }
}

/// Either kind of child a [`Folder`] may hold.
#[derive(Debug, Clone)]
pub enum Entry {
    File(File),
    Folder(Folder),
}

impl Entry {
    pub fn as_file(&self) -> Option<&File> {
        match self {
            Entry::File(f) => Some(f),
            Entry::Folder(_) => None,
        }
    }

    pub fn as_folder(&self) -> Option<&Folder> {
        match self {
            Entry::Folder(f) => Some(f),
            Entry::File(_) => None,
        }
    }
}

/// A directory: Finder metadata plus an ordered, case-insensitively-keyed
/// collection of children. Iteration order is insertion order of the
/// preferred-case name; lookup folds ASCII letters to lowercase (classic HFS
/// does not case-fold anything above 0x7F).
#[derive(Debug, Clone, Default)]
pub struct Folder {
    pub flags: u16,
    pub x: i16,
    pub y: i16,
    pub crdate: u32,
    pub mddate: u32,
    pub bkdate: u32,
    children: Vec<(String, Entry)>,
    index: HashMap<Vec<u8>, usize>,
}

/// A reference to either kind of node, produced while walking a tree.
#[derive(Debug, Clone, Copy)]
pub enum NodeRef<'a> {
    File(&'a File),
    Folder(&'a Folder),
}

impl Folder {
    pub fn new() -> Self {
        Self::default()
    }

    fn folded_key(name: &str) -> Result<Vec<u8>> {
        let mac_bytes = macroman::encode_name(name, NameKind::File)?;
        Ok(macroman::fold(&mac_bytes))
    }

    /// Insert or replace a child. Replacing an existing (case-insensitively
    /// matching) name keeps its position in iteration order but updates the
    /// preferred-case spelling, matching classic HFS folder semantics.
    pub fn insert(&mut self, name: &str, entry: Entry) -> Result<()> {
        let folded = Self::folded_key(name)?;
        if let Some(&i) = self.index.get(&folded) {
            self.children[i] = (name.to_string(), entry);
        } else {
            self.index.insert(folded, self.children.len());
            self.children.push((name.to_string(), entry));
        }
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Entry> {
        let folded = Self::folded_key(name).ok()?;
        self.index.get(&folded).map(|&i| &self.children[i].1)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Entry> {
        let folded = Self::folded_key(name).ok()?;
        let i = *self.index.get(&folded)?;
        Some(&mut self.children[i].1)
    }

    pub fn remove(&mut self, name: &str) -> Option<Entry> {
        let folded = Self::folded_key(name).ok()?;
        let i = self.index.remove(&folded)?;
        let (_, entry) = self.children.remove(i);
        for v in self.index.values_mut() {
            if *v > i {
                *v -= 1;
            }
        }
        Some(entry)
    }

    pub fn len(&self) -> usize {
        self.children.len()
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    /// Preferred-case names, in insertion order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.children.iter().map(|(k, _)| k.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Entry)> {
        self.children.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Depth-first walk of every descendant, yielding the path from this
    /// folder (exclusive) to each node. Matches the order a catalog writer
    /// assigns CNIDs in: a folder's direct children precede their own children.
    pub fn iter_paths(&self) -> Vec<(Vec<String>, NodeRef<'_>)> {
        let mut out = Vec::new();
        self.collect_paths(&mut Vec::new(), &mut out);
        out
    }

    fn collect_paths<'a>(&'a self, prefix: &mut Vec<String>, out: &mut Vec<(Vec<String>, NodeRef<'a>)>) {
        for (name, entry) in &self.children {
            prefix.push(name.clone());
            match entry {
                Entry::File(f) => out.push((prefix.clone(), NodeRef::File(f))),
                Entry::Folder(folder) => {
                    out.push((prefix.clone(), NodeRef::Folder(folder)));
                    folder.collect_paths(prefix, out);
                }
            }
            prefix.pop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn case_insensitive_lookup() {
        let mut root = Folder::new();
        root.insert("ALPHA", Entry::File(File::default())).unwrap();
        assert!(root.get("alpha").is_some());
        assert!(root.get("Alpha").is_some());
        assert_eq!(root.keys().collect::<Vec<_>>(), vec!["ALPHA"]);
    }

    #[test]
    fn replace_preserves_position_updates_case() {
        let mut root = Folder::new();
        root.insert("one", Entry::File(File::default())).unwrap();
        root.insert("two", Entry::File(File::default())).unwrap();
        root.insert("ONE", Entry::File(File::default())).unwrap();
        assert_eq!(root.keys().collect::<Vec<_>>(), vec!["ONE", "two"]);
    }

    #[test]
    fn remove_then_relookup_misses() {
        let mut root = Folder::new();
        root.insert("gone", Entry::File(File::default())).unwrap();
        assert!(root.remove("GONE").is_some());
        assert!(root.get("gone").is_none());
    }

    #[test]
    fn iter_paths_is_depth_first_preorder() {
        let mut sub = Folder::new();
        sub.insert("leaf", Entry::File(File::default())).unwrap();
        let mut root = Folder::new();
        root.insert("sub", Entry::Folder(sub)).unwrap();
        root.insert("top", Entry::File(File::default())).unwrap();

        let paths: Vec<Vec<String>> = root.iter_paths().into_iter().map(|(p, _)| p).collect();
        assert_eq!(
            paths,
            vec![
                vec!["sub".to_string()],
                vec!["sub".to_string(), "leaf".to_string()],
                vec!["top".to_string()],
            ]
        );
    }
}
