mod assembler;
mod comm;
mod dofmap;
mod reorder;
mod system;
