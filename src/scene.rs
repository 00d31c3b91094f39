//! Scene graph persisted in `_scene.json`.
//!
//! A scene is a named forest of objects. Each object carries an arbitrary JSON item
//! (the thing being visualised) and owns its children, so removing an object removes
//! its whole subtree.

use crate::error::{Result, SessionError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneObject {
    pub id: Uuid,
    pub name: String,
    #[serde(default)]
    pub item: Value,
    #[serde(default)]
    pub children: Vec<SceneObject>,
}

impl SceneObject {
    pub fn new(name: impl Into<String>, item: Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            item,
            children: Vec::new(),
        }
    }

    fn find(&self, id: Uuid) -> Option<&SceneObject> {
        if self.id == id {
            return Some(self);
        }
        self.children.iter().find_map(|child| child.find(id))
    }

    fn find_mut(&mut self, id: Uuid) -> Option<&mut SceneObject> {
        if self.id == id {
            return Some(self);
        }
        self.children.iter_mut().find_map(|child| child.find_mut(id))
    }

    fn count(&self) -> usize {
        1 + self.children.iter().map(SceneObject::count).sum::<usize>()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scene {
    pub name: String,
    #[serde(default)]
    pub objects: Vec<SceneObject>,
}

impl Default for Scene {
    fn default() -> Self {
        Self::new("Scene")
    }
}

impl Scene {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            objects: Vec::new(),
        }
    }

    /// Add an object at the root, or under `parent` when given.
    pub fn add(&mut self, name: impl Into<String>, item: Value, parent: Option<Uuid>) -> Result<Uuid> {
        let object = SceneObject::new(name, item);
        let id = object.id;
        match parent {
            None => self.objects.push(object),
            Some(parent_id) => {
                let parent = self
                    .get_mut(parent_id)
                    .ok_or(SessionError::UnknownParent(parent_id))?;
                parent.children.push(object);
            }
        }
        Ok(id)
    }

    pub fn get(&self, id: Uuid) -> Option<&SceneObject> {
        self.objects.iter().find_map(|object| object.find(id))
    }

    pub fn get_mut(&mut self, id: Uuid) -> Option<&mut SceneObject> {
        self.objects.iter_mut().find_map(|object| object.find_mut(id))
    }

    /// First object with the given name in depth-first order.
    pub fn find_by_name(&self, name: &str) -> Option<&SceneObject> {
        self.walk()
            .into_iter()
            .map(|(_, object)| object)
            .find(|object| object.name == name)
    }

    /// Detach an object together with its subtree.
    pub fn remove(&mut self, id: Uuid) -> Option<SceneObject> {
        remove_from(&mut self.objects, id)
    }

    /// Depth-first listing of every object with its nesting depth.
    pub fn walk(&self) -> Vec<(usize, &SceneObject)> {
        let mut out = Vec::new();
        let mut stack: Vec<(usize, &SceneObject)> =
            self.objects.iter().rev().map(|object| (0, object)).collect();
        while let Some((depth, object)) = stack.pop() {
            out.push((depth, object));
            for child in object.children.iter().rev() {
                stack.push((depth + 1, child));
            }
        }
        out
    }

    pub fn len(&self) -> usize {
        self.objects.iter().map(SceneObject::count).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn clear(&mut self) {
        self.objects.clear();
    }
}

fn remove_from(objects: &mut Vec<SceneObject>, id: Uuid) -> Option<SceneObject> {
    if let Some(index) = objects.iter().position(|object| object.id == id) {
        return Some(objects.remove(index));
    }
    objects
        .iter_mut()
        .find_map(|object| remove_from(&mut object.children, id))
}

impl fmt::Display for Scene {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({} objects)", self.name, self.len())?;
        for (depth, object) in self.walk() {
            write!(f, "\n{}- {} [{}]", "  ".repeat(depth + 1), object.name, object.id)?;
        }
        Ok(())
    }
}
