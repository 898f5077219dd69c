use serde::{Deserialize, Serialize};

pub const CONTENT_AIR: u16 = 0;
pub const CONTENT_STONE: u16 = 1;
pub const CONTENT_DIRT: u16 = 2;
pub const CONTENT_GRASS: u16 = 3;
pub const CONTENT_WATER: u16 = 4;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Node {
    pub content: u16,
    pub param: u8,
}

impl Node {
    pub const AIR: Node = Node {
        content: CONTENT_AIR,
        param: 0,
    };

    #[inline]
    pub const fn new(content: u16) -> Self {
        Self { content, param: 0 }
    }

    #[inline]
    pub fn is_air(self) -> bool {
        self.content == CONTENT_AIR
    }
}

/// One entry of the node content table the server pushes to clients.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentDef {
    pub id: u16,
    pub name: String,
    pub solid: bool,
}

/// Content id to definition lookup. Unknown ids are treated as non-solid.
#[derive(Clone, Debug, Default)]
pub struct ContentTable {
    defs: Vec<Option<ContentDef>>,
}

impl ContentTable {
    pub fn from_defs(defs: impl IntoIterator<Item = ContentDef>) -> Self {
        let mut table = Self::default();
        for def in defs {
            table.insert(def);
        }
        table
    }

    /// Table with the builtin content every generator emits.
    pub fn builtin() -> Self {
        let def = |id: u16, name: &str, solid: bool| ContentDef {
            id,
            name: name.to_string(),
            solid,
        };
        Self::from_defs([
            def(CONTENT_AIR, "air", false),
            def(CONTENT_STONE, "stone", true),
            def(CONTENT_DIRT, "dirt", true),
            def(CONTENT_GRASS, "grass", true),
            def(CONTENT_WATER, "water", false),
        ])
    }

    pub fn insert(&mut self, def: ContentDef) {
        let i = def.id as usize;
        if self.defs.len() <= i {
            self.defs.resize(i + 1, None);
        }
        self.defs[i] = Some(def);
    }

    #[inline]
    pub fn get(&self, id: u16) -> Option<&ContentDef> {
        self.defs.get(id as usize).and_then(|d| d.as_ref())
    }

    #[inline]
    pub fn is_solid(&self, id: u16) -> bool {
        self.get(id).is_some_and(|d| d.solid)
    }

    pub fn id_by_name(&self, name: &str) -> Option<u16> {
        self.defs.iter().flatten().find(|d| d.name == name).map(|d| d.id)
    }

    pub fn defs(&self) -> Vec<ContentDef> {
        self.defs.iter().flatten().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.defs.iter().flatten().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
