use crate::face::Face;

/// Which of the six face-adjacent blocks were available when a mesh was
/// built, one bit per `Face::index`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct NeighborsLoaded(u8);

impl NeighborsLoaded {
    pub const NONE: NeighborsLoaded = NeighborsLoaded(0);
    pub const ALL: NeighborsLoaded = NeighborsLoaded(0b11_1111);

    #[inline]
    pub fn get(self, face: Face) -> bool {
        self.0 & (1 << face.index()) != 0
    }

    #[inline]
    pub fn set(&mut self, face: Face, loaded: bool) {
        if loaded {
            self.0 |= 1 << face.index();
        } else {
            self.0 &= !(1 << face.index());
        }
    }

    #[inline]
    pub fn is_complete(self) -> bool {
        self == Self::ALL
    }

    /// Faces whose neighbor was missing.
    pub fn missing(self) -> impl Iterator<Item = Face> {
        Face::ALL.into_iter().filter(move |f| !self.get(*f))
    }
}
