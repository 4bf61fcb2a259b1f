mod dispatch_wire;
mod end_to_end;
