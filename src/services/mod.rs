pub mod rent_roll;
