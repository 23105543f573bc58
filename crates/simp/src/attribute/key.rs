use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AttributeShape {
    Float,
    Int,
    Bool,
    Text,
    FloatArray,
}

impl AttributeShape {
    /// Array values carry a 4-byte element count ahead of their payload.
    #[inline]
    pub fn is_array(self) -> bool {
        matches!(self, AttributeShape::FloatArray)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AttributeGroup {
    Position,
    Velocity,
    Color,
    Colormap,
    Size,
    Visibility,
}

macro_rules! attribute_keys {
    ($($variant:ident => $token:literal, $shape:ident, $group:ident;)+) => {
        /// Keys of a `DATA` subject. Declaration order is the order in which
        /// pending keys are serialized.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub enum AttributeKey {
            $($variant,)+
        }

        impl AttributeKey {
            pub const ALL: &'static [AttributeKey] = &[$(AttributeKey::$variant,)+];

            pub fn as_str(self) -> &'static str {
                match self {
                    $(AttributeKey::$variant => $token,)+
                }
            }

            pub fn shape(self) -> AttributeShape {
                match self {
                    $(AttributeKey::$variant => AttributeShape::$shape,)+
                }
            }

            pub fn group(self) -> AttributeGroup {
                match self {
                    $(AttributeKey::$variant => AttributeGroup::$group,)+
                }
            }

            pub fn from_token(token: &str) -> Option<Self> {
                match token {
                    $($token => Some(AttributeKey::$variant),)+
                    _ => None,
                }
            }
        }
    };
}

attribute_keys! {
    PositionX => "pos.x", FloatArray, Position;
    PositionY => "pos.y", FloatArray, Position;
    PositionZ => "pos.z", FloatArray, Position;
    PositionUnit => "pos.unit", Text, Position;

    VelocityX => "vel.x", FloatArray, Velocity;
    VelocityY => "vel.y", FloatArray, Velocity;
    VelocityZ => "vel.z", FloatArray, Velocity;
    VelocityDistanceUnit => "vel.unit", Text, Velocity;
    VelocityTimeUnit => "vel.t.unit", Text, Velocity;
    VelocityNanMode => "vel.nan.mode", Int, Velocity;
    VelocityEnabled => "vel.enable", Bool, Velocity;

    ColorRed => "col.r", Float, Color;
    ColorGreen => "col.g", Float, Color;
    ColorBlue => "col.b", Float, Color;
    Alpha => "col.a", Float, Color;

    ColormapEnabled => "cmap.enable", Bool, Colormap;
    ColormapRed => "cmap.r", FloatArray, Colormap;
    ColormapGreen => "cmap.g", FloatArray, Colormap;
    ColormapBlue => "cmap.b", FloatArray, Colormap;
    ColormapAlpha => "cmap.a", FloatArray, Colormap;
    ColormapMin => "cmap.min", Float, Colormap;
    ColormapMax => "cmap.max", Float, Colormap;
    ColormapAttributeData => "cmap.attr", FloatArray, Colormap;
    ColormapNanRed => "cmap.nan.r", Float, Colormap;
    ColormapNanGreen => "cmap.nan.g", Float, Colormap;
    ColormapNanBlue => "cmap.nan.b", Float, Colormap;
    ColormapNanAlpha => "cmap.nan.a", Float, Colormap;
    ColormapNanMode => "cmap.nan.mode", Int, Colormap;

    Size => "size.val", Float, Size;
    SizeColormapEnabled => "size.cmap.enable", Bool, Size;
    SizeAttributeData => "size.attr", FloatArray, Size;
    SizeMin => "size.min", Float, Size;
    SizeMax => "size.max", Float, Size;

    Visibility => "vis.val", Bool, Visibility;
}

impl fmt::Display for AttributeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AttributeKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_token(s).ok_or_else(|| s.to_string())
    }
}
