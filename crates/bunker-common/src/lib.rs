// bunker-common — protocol-level pieces shared by the server and any
// front end: byte codec, wire constants, 3D math, the voxel map, world
// object physics, and the packet registry.

pub mod bytes;
pub mod constants;
pub mod math3d;
pub mod packets;
pub mod vxl;
pub mod world;
